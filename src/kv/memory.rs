use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

use super::{KvPair, KvStore, WatchStream};
use crate::error::{Error, Result};

/// In-memory `KvStore`, the default backend this crate ships. Any real
/// deployment wiring in etcd/consul/zk/redis implements the same trait
/// in its place.
pub struct InMemoryKv {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    changes: broadcast::Sender<Vec<KvPair>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            data: RwLock::new(BTreeMap::new()),
            changes: tx,
        }
    }

    fn notify(&self, key: &str, value: Vec<u8>) {
        // No subscribers is the common case outside of heartbeat/schedule
        // watch loops; a send error there just means nobody's listening.
        let _ = self.changes.send(vec![KvPair {
            key: key.to_string(),
            value,
        }]);
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.write().await.insert(key.to_string(), value.clone());
        self.notify(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.data
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let removed = self.data.write().await.remove(key);
        if removed.is_none() {
            return Err(Error::not_found(key));
        }
        self.notify(key, Vec::new());
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let mut data = self.data.write().await;
        let keys: Vec<String> = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            data.remove(&key);
            self.notify(&key, Vec::new());
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KvPair {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    async fn exists(&self, prefix: &str) -> Result<bool> {
        let data = self.data.read().await;
        Ok(data.keys().any(|k| k.starts_with(prefix) || k == prefix))
    }

    async fn watch_tree(&self, prefix: &str) -> Result<WatchStream> {
        // Backend-agnostic filtering: the subscriber only cares about
        // batches touching its prefix, so we hand back the raw receiver and
        // let callers filter. For a single-tenant in-memory store this is
        // cheap enough not to warrant per-prefix channels.
        let _ = prefix;
        Ok(BroadcastStream::new(self.changes.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let kv = InMemoryKv::new();
        kv.put("a/b", b"hello".to_vec()).await.unwrap();
        assert_eq!(kv.get("a/b").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let kv = InMemoryKv::new();
        let err = kv.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_tree_removes_only_matching_prefix() {
        let kv = InMemoryKv::new();
        kv.put("jobs/a", b"1".to_vec()).await.unwrap();
        kv.put("jobs/b", b"2".to_vec()).await.unwrap();
        kv.put("processors/a", b"3".to_vec()).await.unwrap();

        kv.delete_tree("jobs/").await.unwrap();

        assert!(kv.list("jobs/").await.unwrap().is_empty());
        assert_eq!(kv.list("processors/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_returns_empty_not_error_when_no_matches() {
        let kv = InMemoryKv::new();
        assert!(kv.list("nope/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exists_checks_prefix_and_exact_key() {
        let kv = InMemoryKv::new();
        assert!(!kv.exists("jobs").await.unwrap());
        kv.put("jobs/a", b"1".to_vec()).await.unwrap();
        assert!(kv.exists("jobs").await.unwrap());
    }

    #[tokio::test]
    async fn watch_tree_observes_subsequent_puts() {
        let kv = InMemoryKv::new();
        let mut stream = kv.watch_tree("jobs/").await.unwrap();
        kv.put("jobs/a", b"1".to_vec()).await.unwrap();
        let batch = stream.next().await.unwrap().unwrap();
        assert_eq!(batch[0].key, "jobs/a");
        assert_eq!(batch[0].value, b"1");
    }
}
