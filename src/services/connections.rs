//! connections.rs
//!
//! Реестр живых WebSocket-каналов: chat_id -> не более одного канала.
//! Повторное подключение к тому же чату вытесняет предыдущее
//! (last-connect-wins), push - best effort: нет канала - тихий no-op,
//! мёртвый канал выселяется при первой неудачной отправке.
//!
//! Канал - это mpsc::UnboundedSender со строковым payload'ом; сам сокет
//! живёт в обработчике /ws, который пересылает всё из receiver'а в клиент.
//! Дропнутый sender закрывает receiver и тем самым сокет старого клиента.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

struct ChatChannel {
    conn_id: u64,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Clone, Default)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    channels: RwLock<HashMap<i64, ChatChannel>>,
    next_conn_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Зарегистрировать канал чата. Существующий канал вытесняется:
    /// его sender дропается, обработчик старого сокета завершается сам.
    /// Возвращённый conn_id нужен обработчику для guarded disconnect.
    pub async fn connect(&self, chat_id: i64, tx: mpsc::UnboundedSender<String>) -> u64 {
        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.inner.channels.write().await;
        if channels.insert(chat_id, ChatChannel { conn_id, tx }).is_some() {
            debug!("chat {}: previous connection replaced", chat_id);
        }
        conn_id
    }

    /// Снять регистрацию канала. Идемпотентно; conn_id защищает от гонки,
    /// когда закрывающийся старый обработчик выселил бы своего сменщика.
    pub async fn disconnect(&self, chat_id: i64, conn_id: u64) {
        let mut channels = self.inner.channels.write().await;
        if channels.get(&chat_id).is_some_and(|c| c.conn_id == conn_id) {
            channels.remove(&chat_id);
        }
    }

    /// Безусловное удаление канала чата (например, чат удалён).
    pub async fn remove_chat(&self, chat_id: i64) {
        self.inner.channels.write().await.remove(&chat_id);
    }

    pub async fn is_connected(&self, chat_id: i64) -> bool {
        self.inner.channels.read().await.contains_key(&chat_id)
    }

    /// Отправить payload в канал чата. Нет канала - no-op; отправка в
    /// мёртвый канал выселяет его из реестра.
    pub async fn push(&self, chat_id: i64, payload: String) {
        let failed_conn = {
            let channels = self.inner.channels.read().await;
            match channels.get(&chat_id) {
                None => return,
                Some(channel) => match channel.tx.send(payload) {
                    Ok(()) => return,
                    Err(_) => channel.conn_id,
                },
            }
        };

        debug!("chat {}: channel is dead, evicting", chat_id);
        self.disconnect(chat_id, failed_conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_without_channel_is_noop() {
        let manager = ConnectionManager::new();
        manager.push(1, "hello".to_string()).await;
        assert!(!manager.is_connected(1).await);
    }

    #[tokio::test]
    async fn push_delivers_to_connected_channel() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.connect(1, tx).await;

        manager.push(1, "hello".to_string()).await;
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn reconnect_replaces_previous_channel() {
        let manager = ConnectionManager::new();
        let (tx_old, mut rx_old) = mpsc::unbounded_channel();
        let (tx_new, mut rx_new) = mpsc::unbounded_channel();

        manager.connect(1, tx_old).await;
        manager.connect(1, tx_new).await;

        // Старый receiver закрыт дропом вытесненного sender'а
        assert!(rx_old.recv().await.is_none());

        manager.push(1, "for the winner".to_string()).await;
        assert_eq!(rx_new.recv().await.unwrap(), "for the winner");
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_replacement() {
        let manager = ConnectionManager::new();
        let (tx_old, _rx_old) = mpsc::unbounded_channel();
        let (tx_new, _rx_new) = mpsc::unbounded_channel();

        let old_id = manager.connect(1, tx_old).await;
        manager.connect(1, tx_new).await;

        manager.disconnect(1, old_id).await;
        assert!(manager.is_connected(1).await);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = manager.connect(1, tx).await;

        manager.disconnect(1, conn_id).await;
        manager.disconnect(1, conn_id).await;
        assert!(!manager.is_connected(1).await);
    }

    #[tokio::test]
    async fn dead_channel_is_evicted_on_push() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.connect(1, tx).await;
        drop(rx);

        manager.push(1, "into the void".to_string()).await;
        assert!(!manager.is_connected(1).await);
    }
}
