use thiserror::Error;

pub type ReconcilerResult<T> = Result<T, ReconcilerError>;

#[derive(Error, Debug)]
pub enum ReconcilerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("search index error: {0}")]
    Search(#[from] projector::ProjectorError),

    #[error("reconciler error: {0}")]
    Other(#[from] anyhow::Error),
}
