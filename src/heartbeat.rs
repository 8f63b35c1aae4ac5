use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use crate::model::Processor;
use crate::rpc::WorkerClient;
use crate::store::Store;

const PING_INTERVAL: Duration = Duration::from_secs(2);

/// Watches processor registrations and evicts workers that stop answering
/// `Pong`.
pub struct Heartbeat {
    store: Arc<Store>,
}

impl Heartbeat {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Pings every processor already registered, then spawns a task that
    /// consumes `Store::watch_processor_tree` and spawns a ping loop for
    /// every newly-seen registration. Runs until the watch stream ends.
    pub async fn start(&self) {
        match self.store.get_processors().await {
            Ok(processors) => {
                for p in processors {
                    self.spawn_ping_loop(p);
                }
            }
            Err(e) => error!(err = %e, "heartbeat: failed to load initial processor set"),
        }

        let mut stream = match self.store.watch_processor_tree().await {
            Ok(s) => s,
            Err(e) => {
                error!(err = %e, "heartbeat: failed to start processor watch");
                return;
            }
        };

        while let Some(batch) = stream.next().await {
            let batch = match batch {
                Ok(b) => b,
                Err(e) => {
                    warn!(err = %e, "heartbeat: watch stream lagged, continuing");
                    continue;
                }
            };
            for pair in batch {
                // Deletion events carry an empty value and are skipped;
                // eviction cleanup for them already runs inline in the
                // failing ping loop.
                if pair.value.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<Processor>(&pair.value) {
                    Ok(p) => {
                        tokio::time::sleep(PING_INTERVAL).await;
                        self.spawn_ping_loop(p);
                    }
                    Err(e) => {
                        error!(key = %pair.key, err = %e, "heartbeat: failed to decode processor from watch event")
                    }
                }
            }
        }

        debug!("heartbeat: processor watch stream ended");
    }

    fn spawn_ping_loop(&self, processor: Processor) {
        let store = self.store.clone();
        tokio::spawn(async move { ping_loop(store, processor).await });
    }
}

/// Pings one processor every 2 seconds. On transport error or an explicit
/// `success == false` reply, purges the node's unfinished executions,
/// deletes its registration, and exits. Overlapping loops for the same
/// node (possible when a registration is re-observed mid-ping) are
/// tolerated: both converge on the same idempotent cleanup.
async fn ping_loop(store: Arc<Store>, node: Processor) {
    let addr = node.addr();
    loop {
        let failed = match WorkerClient::pong(&addr).await {
            Ok(reply) => !reply.success,
            Err(e) => {
                warn!(addr = %addr, node = %node.node_name, err = %e, "heartbeat: ping failed");
                true
            }
        };

        if failed {
            if let Err(e) = store.delete_executions_by_node_name(&node.node_name).await {
                error!(node = %node.node_name, err = %e, "heartbeat: failed to purge unfinished executions after ping failure");
            }
            // Idempotent: a concurrent loop may have already deleted this
            // processor. NotFound is expected here and swallowed.
            let _ = store.delete_processor(&node.application, &addr).await;
            break;
        }

        tokio::time::sleep(PING_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    fn store() -> Arc<Store> {
        Arc::new(Store::new(Arc::new(InMemoryKv::new()), "khronos"))
    }

    fn processor(node_name: &str, port: i32) -> Processor {
        Processor {
            application: "spider".into(),
            node_name: node_name.into(),
            ip: "127.0.0.1".into(),
            port,
            status: true,
            max_execution_limit: 10,
            undone: 0,
        }
    }

    #[tokio::test]
    async fn ping_loop_evicts_processor_and_purges_unfinished_on_unreachable_node() {
        let store = store();
        let p = processor("w3", 1); // nothing listening on this port
        store.set_processor(&p).await.unwrap();

        let outstanding = crate::model::Execution {
            job_name: "j1".into(),
            payload: Default::default(),
            tags: Default::default(),
            started_at: chrono::Utc::now(),
            finished_at: None,
            success: false,
            output: Vec::new(),
            node_name: "w3".into(),
            group: 1,
            application: "spider".into(),
            attempt: 1,
            concurrency: "forbid".into(),
        };
        let mut finished = outstanding.clone();
        finished.finished_at = Some(chrono::Utc::now());
        finished.success = true;
        finished.started_at = chrono::Utc::now() + chrono::Duration::seconds(1);

        store.set_execution(&outstanding).await.unwrap();
        store.set_execution(&finished).await.unwrap();

        ping_loop(store.clone(), p.clone()).await;

        assert!(store.get_processor("spider", &p.addr()).await.is_err());
        let remaining = store.get_executions("j1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].success);
    }

    #[tokio::test]
    async fn ping_loop_eviction_is_idempotent_on_double_run() {
        let store = store();
        let p = processor("w4", 2);
        store.set_processor(&p).await.unwrap();

        ping_loop(store.clone(), p.clone()).await;
        // Second loop over the same, now-deleted processor must not panic.
        ping_loop(store.clone(), p.clone()).await;

        assert!(store.get_processor("spider", &p.addr()).await.is_err());
    }
}
