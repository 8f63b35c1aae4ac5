use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, error};

use super::proto::{self, khronos_server::Khronos};
use crate::counter::Counter;
use crate::model::Processor;
use crate::store::Store;

/// Coordinator-side RPC surface: `ServNodeReg`, `MakeJob`, `ExecutionDone`.
/// A struct wrapping shared state behind `Arc`, implementing the generated
/// tonic service trait.
pub struct KhronosService {
    store: Arc<Store>,
    counter: Arc<Counter>,
}

impl KhronosService {
    pub fn new(store: Arc<Store>, counter: Arc<Counter>) -> Self {
        Self { store, counter }
    }
}

#[tonic::async_trait]
impl Khronos for KhronosService {
    /// Worker just (re)registered: purge any executions left outstanding
    /// from a previous life of this node, default the execution limit, and
    /// persist the registration.
    async fn serv_node_reg(
        &self,
        request: Request<proto::Processor>,
    ) -> Result<Response<proto::RpcReply>, Status> {
        let mut p: Processor = request.into_inner().into();

        if let Err(e) = self.store.delete_executions_by_node_name(&p.node_name).await {
            error!(node = %p.node_name, err = %e, "rpc: failed to purge executions before ServNodeReg");
        }

        p.normalize();

        match self.store.set_processor(&p).await {
            Ok(()) => Ok(Response::new(proto::RpcReply { success: true, ack: 1 })),
            Err(e) => {
                error!(processor = %p.addr(), err = %e, "rpc: ServNodeReg failed");
                Err(Status::internal(e.to_string()))
            }
        }
    }

    async fn make_job(
        &self,
        request: Request<proto::Job>,
    ) -> Result<Response<proto::RpcReply>, Status> {
        let job = request.into_inner().into();
        match self.store.set_job(job).await {
            Ok(stored) => {
                debug!(job = %stored.name, "rpc: MakeJob stored");
                Ok(Response::new(proto::RpcReply { success: true, ack: 1 }))
            }
            Err(e) => {
                error!(err = %e, "rpc: MakeJob failed");
                Err(Status::internal(e.to_string()))
            }
        }
    }

    /// Execution reported complete: persist the final record, patch the
    /// job's success/error metadata, and release the execution's slot in
    /// the outstanding-work counter (incremented at dispatch, decremented
    /// here).
    async fn execution_done(
        &self,
        request: Request<proto::Execution>,
    ) -> Result<Response<proto::RpcReply>, Status> {
        let mut ex: crate::model::Execution = request.into_inner().into();
        ex.finished_at = Some(chrono::Utc::now());

        let quota = ex.quota_label();
        self.counter.minus(&ex.node_name, &quota);

        if let Err(e) = self.store.set_execution(&ex).await {
            error!(execution = %ex.key(), err = %e, "rpc: ExecutionDone failed to persist execution");
        }

        match self.store.get_job(&ex.job_name).await {
            Ok(mut job) => {
                if ex.success {
                    job.metadata.success_count += 1;
                    job.metadata.last_success = Some(chrono::Utc::now());
                } else {
                    job.metadata.error_count += 1;
                    job.metadata.last_error = Some(chrono::Utc::now());
                }
                if let Err(e) = self.store.set_job(job).await {
                    error!(job = %ex.job_name, err = %e, "rpc: ExecutionDone failed to patch job metadata");
                }
            }
            Err(e) => {
                error!(job = %ex.job_name, err = %e, "rpc: ExecutionDone failed to load job");
            }
        }

        Ok(Response::new(proto::RpcReply { success: true, ack: 1 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::model::Job;

    fn service() -> KhronosService {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new()), "khronos"));
        KhronosService::new(store, Arc::new(Counter::new()))
    }

    #[tokio::test]
    async fn serv_node_reg_defaults_execution_limit() {
        let svc = service();
        let p = proto::Processor {
            application: "spider".into(),
            node_name: "w1".into(),
            ip: "127.0.0.1".into(),
            port: 9001,
            status: true,
            max_execution_limit: 0,
            undone: 0,
        };
        let reply = svc.serv_node_reg(Request::new(p)).await.unwrap().into_inner();
        assert!(reply.success);

        let stored = svc.store.get_processor("spider", "127.0.0.1:9001").await.unwrap();
        assert_eq!(stored.max_execution_limit, 10);
    }

    #[tokio::test]
    async fn make_job_persists_job() {
        let svc = service();
        let job = Job::builder()
            .name("j1")
            .schedule("@every 2s")
            .application("spider")
            .build();
        let reply = svc
            .make_job(Request::new((&job).into()))
            .await
            .unwrap()
            .into_inner();
        assert!(reply.success);
        assert!(svc.store.get_job("j1").await.is_ok());
    }

    #[tokio::test]
    async fn execution_done_patches_job_success_metadata() {
        let svc = service();
        let job = Job::builder()
            .name("j1")
            .schedule("@every 2s")
            .application("spider")
            .build();
        svc.store.set_job(job.clone()).await.unwrap();

        let mut ex = crate::model::Execution::new(&job);
        ex.node_name = "w1".into();
        ex.success = true;

        let reply = svc
            .execution_done(Request::new((&ex).into()))
            .await
            .unwrap()
            .into_inner();
        assert!(reply.success);

        let stored_job = svc.store.get_job("j1").await.unwrap();
        assert_eq!(stored_job.metadata.success_count, 1);
    }

    #[tokio::test]
    async fn execution_done_decrements_counter() {
        let svc = service();
        let job = Job::builder()
            .name("j1")
            .schedule("@every 2s")
            .application("spider")
            .build();
        svc.store.set_job(job.clone()).await.unwrap();
        svc.counter.plus("w1", "undo");

        let mut ex = crate::model::Execution::new(&job);
        ex.node_name = "w1".into();
        ex.success = true;

        svc.execution_done(Request::new((&ex).into())).await.unwrap();

        assert_eq!(svc.counter.get("w1", "undo"), 0);
    }
}
