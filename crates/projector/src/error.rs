//! Error types for the read-model projector.

use thiserror::Error;

pub type ProjectorResult<T> = Result<T, ProjectorError>;

#[derive(Error, Debug)]
pub enum ProjectorError {
    #[error("invalid Elasticsearch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build transport: {0}")]
    TransportBuild(#[from] elasticsearch::http::transport::BuildError),
    #[error("transport error: {0}")]
    Transport(#[from] elasticsearch::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("idempotency guard error: {0}")]
    Idempotency(#[from] idempotent_consumer::IdempotencyError),
    #[error("projector error: {0}")]
    Other(#[from] anyhow::Error),
}
