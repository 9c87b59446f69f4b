use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Chat {
    pub id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Chat {
    // Чат существует и принадлежит пользователю?
    pub async fn belongs_to_user(
        chat_id: i64,
        user_id: i64,
        pool: &sqlx::PgPool,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM chats WHERE id = $1 AND user_id = $2)",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(pool)
        .await
    }
}
