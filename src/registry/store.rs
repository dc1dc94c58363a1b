//! Stream registry implementation

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::entry::{Stream, StreamInfo};
use super::key::StreamKey;

/// Concurrent table of live streams
///
/// `get_or_create` and `remove` take the write lock, so creation and removal
/// of a key are linearized; listings take the read lock and return copies.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: RwLock<HashMap<StreamKey, Arc<Stream>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the active stream for `key`, creating it if there is none
    ///
    /// A second publisher for a live key shares the existing entry.
    pub async fn get_or_create(&self, key: &StreamKey) -> Arc<Stream> {
        let mut streams = self.streams.write().await;

        if let Some(stream) = streams.get(key) {
            if stream.is_active() {
                tracing::debug!(stream = %key, "Joining existing stream");
                return Arc::clone(stream);
            }
        }

        let stream = Arc::new(Stream::new(key.clone()));
        streams.insert(key.clone(), Arc::clone(&stream));
        tracing::info!(stream = %key, active = streams.len(), "Stream created");
        stream
    }

    /// Deactivate and drop the entry for `key`; no-op if absent
    pub async fn remove(&self, key: &StreamKey) {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.remove(key) {
            stream.close();
            tracing::info!(stream = %key, active = streams.len(), "Stream removed");
        }
    }

    /// Like [`remove`](Self::remove), but only if `key` still maps to this
    /// very entry
    ///
    /// Returns whether the entry was removed.
    pub async fn remove_entry(&self, stream: &Arc<Stream>) -> bool {
        let mut streams = self.streams.write().await;
        let key = stream.key();
        let current = streams.get(key).is_some_and(|s| Arc::ptr_eq(s, stream));
        if !current {
            tracing::debug!(stream = %key, "Entry already replaced or removed");
            return false;
        }

        streams.remove(key);
        stream.close();
        tracing::info!(stream = %key, active = streams.len(), "Stream removed");
        true
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Stream>> {
        self.streams.read().await.get(key).cloned()
    }

    /// Snapshot of every active stream, ordered by key
    pub async fn all_active(&self) -> Vec<StreamInfo> {
        let streams = self.streams.read().await;
        let mut infos: Vec<StreamInfo> = streams
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.info())
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub async fn count(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .filter(|s| s.is_active())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_returns_same_entry() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("k");

        let first = registry.get_or_create(&key).await;
        let second = registry.get_or_create(&key).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.count().await, 1);

        registry.remove(&key).await;
        assert!(!first.is_active());

        let third = registry.get_or_create(&key).await;
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.is_active());
    }

    #[tokio::test]
    async fn test_remove_twice_is_noop() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("k");
        registry.get_or_create(&key).await;

        registry.remove(&key).await;
        registry.remove(&key).await;
        assert!(registry.get("k").await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_entry_spares_newer_stream() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("k");

        let stale = registry.get_or_create(&key).await;
        registry.remove(&key).await;
        let fresh = registry.get_or_create(&key).await;

        assert!(!registry.remove_entry(&stale).await);
        let current = registry.get("k").await.unwrap();
        assert!(Arc::ptr_eq(&current, &fresh));
        assert!(fresh.is_active());

        assert!(registry.remove_entry(&fresh).await);
        assert!(!fresh.is_active());
        assert!(registry.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_one_entry() {
        let registry = Arc::new(StreamRegistry::new());
        let key = StreamKey::new("new-key");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                tokio::spawn(async move { registry.get_or_create(&key).await })
            })
            .collect();

        let mut streams = Vec::new();
        for handle in handles {
            streams.push(handle.await.unwrap());
        }

        assert_eq!(registry.count().await, 1);
        assert!(streams.iter().all(|s| Arc::ptr_eq(s, &streams[0])));
    }

    #[tokio::test]
    async fn test_snapshot_is_independent() {
        let registry = StreamRegistry::new();
        registry.get_or_create(&StreamKey::new("b")).await;
        registry.get_or_create(&StreamKey::new("a")).await;

        let snapshot = registry.all_active().await;
        registry.remove(&StreamKey::new("a")).await;

        let keys: Vec<&str> = snapshot.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert!(snapshot[0].active);

        let after = registry.all_active().await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].key, "b");
    }
}
