use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;
use tracing::{debug, error};

use crate::counter::Counter;
use crate::error::Result;
use crate::heartbeat::Heartbeat;
use crate::kv::KvStore;
use crate::model::Execution;
use crate::placement::{self, Rebalance};
use crate::rpc::proto::khronos_server::KhronosServer;
use crate::rpc::{KhronosService, WorkerClient};
use crate::scheduler::{DispatchFn, Scheduler};
use crate::store::Store;

/// Schedule reload cadence: the Agent re-reads every job and restarts the
/// scheduler on this interval, so jobs created out-of-band (direct KV
/// writes, a second coordinator) eventually take effect without a restart.
const RELOAD_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Composition root: wires store, scheduler, counter, heartbeat and RPC
/// surface together and drives the agent's concurrent loops.
pub struct Agent {
    store: Arc<Store>,
    counter: Arc<Counter>,
    scheduler: Scheduler,
    rebalance: Rebalance,
}

impl Agent {
    pub fn new(kv: Arc<dyn KvStore>, keyspace: impl Into<String>, rebalance: Rebalance) -> Arc<Self> {
        let store = Arc::new(Store::new(kv, keyspace));
        let counter = Arc::new(Counter::new());

        Arc::new_cyclic(|weak: &std::sync::Weak<Agent>| {
            let weak = weak.clone();
            let dispatch: DispatchFn = Arc::new(move |ex: Execution| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(agent) = weak.upgrade() {
                        agent.dispatch(ex).await;
                    }
                })
            });

            Agent {
                scheduler: Scheduler::new(store.clone(), dispatch),
                store,
                counter,
                rebalance,
            }
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// `Agent.StartServer`: loads and starts the scheduler, launches the
    /// heartbeat watcher and the reload loop as background tasks, and
    /// serves the coordinator-side RPC surface on `addr` until it returns
    /// (normally only on shutdown or bind failure).
    pub async fn run(self: &Arc<Self>, rpc_addr: std::net::SocketAddr) -> Result<()> {
        self.schedule().await;

        let heartbeat = Heartbeat::new(self.store.clone());
        tokio::spawn(async move { heartbeat.start().await });

        let this = self.clone();
        tokio::spawn(async move { this.reload_loop().await });

        debug!(addr = %rpc_addr, "agent: starting rpc server");
        let service = KhronosService::new(self.store.clone(), self.counter.clone());
        Server::builder()
            .add_service(KhronosServer::new(service))
            .serve(rpc_addr)
            .await?;
        Ok(())
    }

    /// `Agent.Schedule`: load every job and (re)start the cron engine.
    async fn schedule(&self) {
        match self.store.get_jobs().await {
            Ok(jobs) => {
                if let Err(e) = self.scheduler.restart(jobs).await {
                    error!(err = %e, "agent: failed to start scheduler");
                }
            }
            Err(e) => error!(err = %e, "agent: failed to load jobs for scheduling"),
        }
    }

    async fn reload_loop(&self) {
        loop {
            tokio::time::sleep(RELOAD_INTERVAL).await;
            debug!("agent: periodic schedule reload");
            self.schedule().await;
        }
    }

    /// `Agent.Do`: resolve targets for `ex`, dispatch to each over RPC,
    /// incrementing the outstanding-work counter per target before the
    /// call (Open Question #1: increment at dispatch, decrement in
    /// `ExecutionDone`). Transport failures are logged and do not abort
    /// dispatch to the remaining targets.
    async fn dispatch(&self, mut ex: Execution) {
        let processors = match self.store.get_processors_by_app(&ex.application).await {
            Ok(p) => p,
            Err(e) => {
                error!(application = %ex.application, err = %e, "agent: failed to load processors for dispatch");
                return;
            }
        };

        let targets = placement::place(processors, &ex, &self.counter, self.rebalance);
        if targets.is_empty() {
            error!(job = %ex.job_name, application = %ex.application, "agent: no eligible worker for dispatch");
            return;
        }

        for target in targets {
            ex.node_name = target.node_name.clone();
            let quota = ex.quota_label();
            self.counter.plus(&target.node_name, &quota);

            match WorkerClient::execution_do(&target.addr(), &ex).await {
                Ok(reply) if reply.ack > 0 => {
                    if let Err(e) = self.store.set_execution(&ex).await {
                        error!(job = %ex.job_name, node = %target.node_name, err = %e, "agent: failed to persist dispatched execution");
                    }
                }
                Ok(_) => {
                    debug!(job = %ex.job_name, node = %target.node_name, "agent: worker declined execution (ack == 0)");
                }
                Err(e) => {
                    error!(job = %ex.job_name, node = %target.node_name, err = %e, "agent: execution_do failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::model::{Job, Processor};
    use tonic::transport::Server as TonicServer;

    struct MockWorker {
        ack: i32,
    }

    #[tonic::async_trait]
    impl crate::rpc::proto::worker_server::Worker for MockWorker {
        async fn execution_do(
            &self,
            _request: tonic::Request<crate::rpc::proto::Execution>,
        ) -> std::result::Result<tonic::Response<crate::rpc::proto::RpcReply>, tonic::Status> {
            Ok(tonic::Response::new(crate::rpc::proto::RpcReply {
                success: self.ack > 0,
                ack: self.ack,
            }))
        }

        async fn pong(
            &self,
            _request: tonic::Request<crate::rpc::proto::PongRequest>,
        ) -> std::result::Result<tonic::Response<crate::rpc::proto::RpcReply>, tonic::Status> {
            Ok(tonic::Response::new(crate::rpc::proto::RpcReply {
                success: true,
                ack: 1,
            }))
        }
    }

    async fn spawn_mock_worker(ack: i32) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
        tokio::spawn(async move {
            TonicServer::builder()
                .add_service(crate::rpc::proto::worker_server::WorkerServer::new(MockWorker { ack }))
                .serve_with_incoming(incoming)
                .await
                .unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        addr
    }

    fn agent() -> Arc<Agent> {
        Agent::new(Arc::new(InMemoryKv::new()), "khronos", Rebalance::LeastLoaded)
    }

    #[tokio::test]
    async fn dispatch_persists_execution_and_increments_then_leaves_counter_on_ack() {
        let addr = spawn_mock_worker(1).await;
        let a = agent();

        let p = Processor {
            application: "spider".into(),
            node_name: "w1".into(),
            ip: addr.ip().to_string(),
            port: addr.port() as i32,
            status: true,
            max_execution_limit: 10,
            undone: 0,
        };
        a.store.set_processor(&p).await.unwrap();

        let job = Job::builder()
            .name("j1")
            .schedule("@every 2s")
            .application("spider")
            .concurrency("forbid")
            .build();
        let ex = Execution::new(&job);

        a.dispatch(ex).await;

        assert_eq!(a.counter.get("w1", "undo"), 1);
        let stored = a.store.get_executions("j1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].node_name, "w1");
    }

    #[tokio::test]
    async fn dispatch_does_not_persist_when_worker_declines() {
        let addr = spawn_mock_worker(0).await;
        let a = agent();

        let p = Processor {
            application: "spider".into(),
            node_name: "w1".into(),
            ip: addr.ip().to_string(),
            port: addr.port() as i32,
            status: true,
            max_execution_limit: 10,
            undone: 0,
        };
        a.store.set_processor(&p).await.unwrap();

        let job = Job::builder()
            .name("j1")
            .schedule("@every 2s")
            .application("spider")
            .concurrency("forbid")
            .build();
        let ex = Execution::new(&job);

        a.dispatch(ex).await;

        assert!(a.store.get_executions("j1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_with_no_processors_logs_and_returns() {
        let a = agent();
        let job = Job::builder()
            .name("j1")
            .schedule("@every 2s")
            .application("spider")
            .build();
        let ex = Execution::new(&job);

        a.dispatch(ex).await;

        assert!(a.store.get_executions("j1").await.unwrap().is_empty());
    }
}
