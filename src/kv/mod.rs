mod memory;

pub use memory::InMemoryKv;

use async_trait::async_trait;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::Result;

/// A single key/value pair as returned by `list`/`watch_tree`. `value` is
/// empty on a deletion event delivered through a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
}

/// A stream of batches of changed key/value pairs under a watched prefix.
/// Lazy, effectively infinite and non-restartable: when the underlying
/// channel closes the stream simply ends, and the caller (the
/// heartbeat/schedule watchers) is responsible for logging and, if
/// desired, re-establishing the watch.
pub type WatchStream = BroadcastStream<Vec<KvPair>>;

/// Uniform interface over a watchable, hierarchical key-value backend.
/// The concrete backend (etcd/etcdv3/consul/zk/redis) is a deployment
/// concern — only this trait's contract matters here. `InMemoryKv` is
/// the only implementation this crate carries, standing in for whichever
/// backend a deployment wires up.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Returns `Error::NotFound` if the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes every key under `prefix`. Not an error if nothing matches.
    async fn delete_tree(&self, prefix: &str) -> Result<()>;

    /// Lists every key/value pair under `prefix`. Empty, not an error, when
    /// nothing matches.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>>;

    async fn exists(&self, prefix: &str) -> Result<bool>;

    /// Subscribes to changes under `prefix`. Each item is a batch of
    /// key/value pairs changed since the last batch.
    async fn watch_tree(&self, prefix: &str) -> Result<WatchStream>;
}
