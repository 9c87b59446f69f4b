use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::middleware;
use crate::models::Chat;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws/chat/{chat_id}", get(chat_ws))
}

// Браузер не умеет ставить заголовки на WebSocket upgrade,
// поэтому токен приходит query-параметром
#[derive(Debug, Deserialize)]
struct WsAuthQuery {
    token: String,
}

// GET /ws/chat/{chat_id}?token=...
async fn chat_ws(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<i64>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Строгая проверка: истёкший токен на WS-пути не перевыпускается
    let authorized = match middleware::authenticate(&state, &query.token, false).await {
        Ok(outcome) => {
            let owned = Chat::belongs_to_user(chat_id, outcome.user.id, &state.db.pool)
                .await
                .unwrap_or(false);
            if !owned {
                warn!(
                    "User {} tried to connect to unauthorized chat {}",
                    outcome.user.id, chat_id
                );
            }
            owned
        }
        Err(_) => {
            warn!("WebSocket authentication failed for chat {}", chat_id);
            false
        }
    };

    ws.on_upgrade(move |socket| handle_socket(state, chat_id, socket, authorized))
}

async fn handle_socket(
    state: Arc<AppState>,
    chat_id: i64,
    mut socket: WebSocket,
    authorized: bool,
) {
    if !authorized {
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "policy violation".into(),
            })))
            .await;
        return;
    }

    let (tx, mut outbound) = mpsc::unbounded_channel::<String>();
    let conn_id = state.connections.connect(chat_id, tx).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if ws_tx.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                // Канал закрыт: это подключение вытеснено более новым
                None => {
                    debug!("chat {}: connection replaced, closing socket", chat_id);
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            inbound = ws_rx.next() => match inbound {
                // Клиент шлёт только keep-alive, содержимое не интересно
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.connections.disconnect(chat_id, conn_id).await;
}
