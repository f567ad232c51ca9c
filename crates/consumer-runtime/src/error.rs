use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("broker error: {0}")]
    Broker(#[from] message_bus::BrokerError),

    #[error("consumer group already exists: {0}")]
    GroupAlreadyExists(String),

    #[error("unknown consumer group: {0}")]
    UnknownGroup(String),

    #[error("neither a message handler nor a batch handler was configured")]
    NoHandlerConfigured,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ConsumerResult<T> = Result<T, ConsumerError>;
