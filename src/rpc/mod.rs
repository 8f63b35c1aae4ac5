pub mod proto {
    tonic::include_proto!("khronos.v1");
}

mod client;
mod conv;
mod server;

pub use client::WorkerClient;
pub use server::KhronosService;
