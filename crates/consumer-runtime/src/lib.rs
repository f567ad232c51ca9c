//! Consumer-group runtime: polling workers over the in-process broker,
//! with per-message retry and dead-letter disposition.

pub mod error;
pub mod group;
pub mod worker;

pub use error::{ConsumerError, ConsumerResult};
pub use group::ConsumerGroupFactory;
pub use worker::{BatchHandler, ConsumerWorker, Handler, MessageHandler, WorkerConfig, WorkerStats};
