use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Performance {
    pub id: i64,
    pub date: NaiveDate,
    pub title: String,
    pub author: Option<String>,
    pub actors: Option<String>,
}
