//! # Reconciler (C10)
//!
//! Closes the gap between the write store and the search index: a
//! scheduled `incremental_sync` catches anything a dropped or dead-lettered
//! event left behind, and an on-demand `full_sync` rebuilds the index from
//! scratch for cold start or disaster recovery.
//!
//! Runs independently of the consumer workers — the only thing it shares
//! with the projector is the index itself, and it treats the write store's
//! counters as authoritative rather than recomputing them, so a sync pass
//! can never clobber what the projector's atomic increments have done.

pub mod config;
pub mod error;
pub mod metrics;
mod reconciler;
pub mod store;

pub use config::ReconcilerConfig;
pub use error::{ReconcilerError, ReconcilerResult};
pub use metrics::ReconcilerMetrics;
pub use reconciler::Reconciler;
pub use store::{ProductRow, ProductStore, SqlxProductStore};
