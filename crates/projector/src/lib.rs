//! # Read-Model Projector (C9)
//!
//! Subscribes to `product-events` via the consumer-group factory and
//! maintains the Elasticsearch-backed search index: full upserts on
//! `ProductCreated`/`ProductUpdated`, deletes on `ProductDeleted`, and
//! atomic server-side counter increments on `ProductViewed`/
//! `ProductPurchased`/`ProductInventoryChanged`.
//!
//! Idempotency is enforced per message via [`idempotent_consumer::IdempotencyGuard`]
//! keyed on the `idempotency-key` header, so a redelivered message (the
//! substrate only promises at-least-once) is a no-op the second time.

pub mod config;
pub mod document;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod search;

pub use config::ProjectorConfig;
pub use document::ProjectedDocument;
pub use error::{ProjectorError, ProjectorResult};
pub use search::{Counter, ElasticsearchClient};
pub use handler::ProjectorHandler;
pub use metrics::ProjectorMetrics;
