//! # Transactional Outbox
//!
//! Durable staging of domain events within the same write transaction as
//! the business mutation, drained asynchronously into the message bus.
//!
//! 1. Business logic changes and event creation happen in the same
//!    transaction ([`produce::store_event`]).
//! 2. Events sit in the `outbox_events` table until a [`dispatcher::OutboxDispatcher`]
//!    drain picks them up.
//! 3. The dispatcher publishes through an [`publisher::OutboxPublisher`] and
//!    marks the row processed only after a successful publish.
//!
//! This guarantees **at-least-once delivery**: a crash between commit and
//! publish, or a transient broker outage, cannot lose the event — only
//! delay it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use outbox::{store_event, store::SqlxOutboxStore};
//! use sqlx::PgPool;
//! use uuid::Uuid;
//! use serde_json::json;
//!
//! async fn create_product(pool: &PgPool, store: &SqlxOutboxStore, product_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!
//!     sqlx::query!("INSERT INTO products (id) VALUES ($1)", product_id)
//!         .execute(&mut *tx)
//!         .await?;
//!
//!     store_event!(store, &mut tx, product_id, "product", "ProductCreated", &json!({ "id": product_id })).await?;
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

mod error;
pub mod dispatcher;
pub mod macros;
pub mod metrics;
pub mod produce;
pub mod publisher;
pub mod store;

pub use dispatcher::{DispatcherConfig, OutboxDispatcher};
pub use error::{OutboxError, OutboxResult};
pub use metrics::OutboxMetrics;
pub use produce::store_event;
pub use publisher::{BrokerOutboxPublisher, KafkaOutboxPublisher, OutboxPublisher};
pub use store::{OutboxEvent, OutboxStore, SqlxOutboxStore};
