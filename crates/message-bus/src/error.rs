use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown consumer group: {0}")]
    UnknownGroup(String),

    #[error("executor queue full, publish rejected")]
    ResourceExhausted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;
