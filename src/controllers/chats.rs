use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::middleware::{require_auth, AuthUser};
use crate::models::{Chat, Message};
use crate::services::assistant;
use crate::AppState;

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/chats", post(create_chat).get(list_chats))
        .route("/chats/{chat_id}", delete(delete_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(get_chat_messages).post(send_message),
        )
        .route("/messages/{message_id}", delete(delete_message))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

/* ---------- helpers ---------- */

fn internal(e: sqlx::Error, what: &str) -> (StatusCode, String) {
    tracing::error!("{} sql error: {:?}", what, e);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {what}"))
}

fn chat_not_found() -> (StatusCode, String) {
    // Чужой чат неотличим от несуществующего
    (
        StatusCode::NOT_FOUND,
        "Chat not found or not authorized".to_string(),
    )
}

async fn owned_chat_or_404(
    state: &AppState,
    chat_id: i64,
    user_id: i64,
) -> Result<(), (StatusCode, String)> {
    let owned = Chat::belongs_to_user(chat_id, user_id, &state.db.pool)
        .await
        .map_err(|e| internal(e, "check chat ownership"))?;
    if owned {
        Ok(())
    } else {
        Err(chat_not_found())
    }
}

/* ---------- CHATS ---------- */

// POST /api/chats
async fn create_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let chat = sqlx::query_as::<_, Chat>(
        "INSERT INTO chats (user_id) VALUES ($1) RETURNING id, user_id, created_at",
    )
    .bind(user.id)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| internal(e, "create chat"))?;

    Ok((StatusCode::CREATED, Json(chat)))
}

// GET /api/chats
async fn list_chats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let chats = sqlx::query_as::<_, Chat>(
        "SELECT id, user_id, created_at FROM chats WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal(e, "list chats"))?;

    Ok((StatusCode::OK, Json(chats)))
}

// DELETE /api/chats/{chat_id}
async fn delete_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(chat_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    owned_chat_or_404(&state, chat_id, user.id).await?;

    // Сообщения уходят каскадом
    sqlx::query("DELETE FROM chats WHERE id = $1")
        .bind(chat_id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| internal(e, "delete chat"))?;

    state.connections.remove_chat(chat_id).await;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({"message": "Chat deleted successfully"})),
    ))
}

/* ---------- MESSAGES ---------- */

// GET /api/chats/{chat_id}/messages
async fn get_chat_messages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(chat_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    owned_chat_or_404(&state, chat_id, user.id).await?;

    let messages = sqlx::query_as::<_, Message>(
        "SELECT id, chat_id, sender, content, timestamp
         FROM messages
         WHERE chat_id = $1
         ORDER BY timestamp, id",
    )
    .bind(chat_id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal(e, "list messages"))?;

    Ok((StatusCode::OK, Json(messages)))
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    content: String,
}

// POST /api/chats/{chat_id}/messages - один ход диалога с ассистентом
async fn send_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(chat_id): Path<i64>,
    Json(req): Json<MessageCreate>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    owned_chat_or_404(&state, chat_id, user.id).await?;

    let assistant_message = assistant::process_user_turn(&state, &user, chat_id, &req.content)
        .await
        .map_err(|e| internal(e, "process message"))?;

    Ok((StatusCode::OK, Json(assistant_message)))
}

// DELETE /api/messages/{message_id}
async fn delete_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT id, chat_id, sender, content, timestamp FROM messages WHERE id = $1",
    )
    .bind(message_id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| internal(e, "load message"))?
    .ok_or((StatusCode::NOT_FOUND, "Message not found".to_string()))?;

    let owns_chat = Chat::belongs_to_user(message.chat_id, user.id, &state.db.pool)
        .await
        .map_err(|e| internal(e, "check chat ownership"))?;
    if !owns_chat {
        return Err((
            StatusCode::FORBIDDEN,
            "Not authorized to delete this message".to_string(),
        ));
    }

    if message.sender != user.username && message.sender != assistant::ASSISTANT_SENDER {
        return Err((
            StatusCode::FORBIDDEN,
            "Only owner or AI messages can be deleted.".to_string(),
        ));
    }

    sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(message_id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| internal(e, "delete message"))?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({"message": "Message deleted successfully"})),
    ))
}
