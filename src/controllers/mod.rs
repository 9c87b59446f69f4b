pub mod auth;
pub mod chats;
pub mod ws;

use axum::Router;
use std::sync::Arc;

pub fn routes(state: Arc<crate::AppState>) -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(auth::routes())
        .merge(chats::routes(state))
}
