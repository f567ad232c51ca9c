//! In-process partitioned message bus standing in for an external log
//! (Kafka, say) behind the same publish/subscribe/poll/commit contract.

pub mod broker;
pub mod error;
pub mod message;
pub mod publisher;

pub use broker::{Broker, BrokerStats};
pub use error::{BrokerError, BrokerResult};
pub use message::{Message, MessageBatch};
pub use publisher::{Publisher, PublisherStats};
