//! Channel registry: register and lookup channels by id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle to a running channel (stop, send message).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Send a text message to a conversation (e.g. Telegram chat_id). Default returns error.
    async fn send_message(&self, _conversation_id: &str, _text: &str) -> Result<(), String> {
        Err("send not implemented".to_string())
    }
}

/// Registry of channel ids to handles. Shared across gateway.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handle; a handle previously registered under the same id is stopped.
    pub async fn register(&self, id: String, handle: Arc<dyn ChannelHandle>) {
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id.clone(), handle) {
            log::debug!("channel {} re-registered, stopping previous handle", id);
            old.stop();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        let g = self.inner.read().await;
        g.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        g.keys().cloned().collect()
    }

    /// Stop every registered connector.
    pub async fn stop_all(&self) {
        let g = self.inner.read().await;
        for handle in g.values() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Dummy {
        id: String,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl ChannelHandle for Dummy {
        fn id(&self) -> &str {
            &self.id
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn dummy(id: &str) -> Arc<Dummy> {
        Arc::new(Dummy {
            id: id.to_string(),
            stopped: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn re_register_stops_old_handle() {
        let reg = ChannelRegistry::new();
        let first = dummy("telegram");
        let second = dummy("telegram");
        reg.register("telegram".into(), first.clone()).await;
        reg.register("telegram".into(), second.clone()).await;
        assert!(first.stopped.load(Ordering::SeqCst));
        assert!(!second.stopped.load(Ordering::SeqCst));
        assert_eq!(reg.ids().await, vec!["telegram".to_string()]);
    }

    #[tokio::test]
    async fn default_send_is_an_error() {
        let reg = ChannelRegistry::new();
        reg.register("x".into(), dummy("x")).await;
        let handle = reg.get("x").await.expect("registered");
        assert!(handle.send_message("1", "hi").await.is_err());
        assert!(reg.get("y").await.is_none());
    }

    #[tokio::test]
    async fn stop_all_stops_everything() {
        let reg = ChannelRegistry::new();
        let a = dummy("a");
        let b = dummy("b");
        reg.register("a".into(), a.clone()).await;
        reg.register("b".into(), b.clone()).await;
        reg.stop_all().await;
        assert!(a.stopped.load(Ordering::SeqCst));
        assert!(b.stopped.load(Ordering::SeqCst));
    }
}
