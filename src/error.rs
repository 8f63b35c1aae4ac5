use thiserror::Error;

/// Errors surfaced by the KV adapter, the store, and the dispatch pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("failed to decode stored value at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound(key.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
