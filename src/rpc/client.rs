use tonic::Request;

use super::proto::{self, worker_client};
use crate::error::{Error, Result};
use crate::model::Execution;

/// Coordinator-side client for the worker's RPC surface: `ExecutionDo`,
/// `Pong`. A fresh connection per call, no retry — on transport error, log
/// and move on to the next target rather than retrying this one.
pub struct WorkerClient;

impl WorkerClient {
    /// Calls `Worker.ExecutionDo` at `addr` (`"ip:port"`). Mutates
    /// `ex.node_name` to the target before sending.
    pub async fn execution_do(addr: &str, ex: &Execution) -> Result<proto::RpcReply> {
        let mut client = worker_client::WorkerClient::connect(format!("http://{addr}"))
            .await
            .map_err(Error::Transport)?;
        let response = client.execution_do(Request::new(ex.into())).await?;
        Ok(response.into_inner())
    }

    /// Calls `Worker.Pong` at `addr`.
    pub async fn pong(addr: &str) -> Result<proto::RpcReply> {
        let mut client = worker_client::WorkerClient::connect(format!("http://{addr}"))
            .await
            .map_err(Error::Transport)?;
        let response = client.pong(Request::new(proto::PongRequest {})).await?;
        Ok(response.into_inner())
    }
}
