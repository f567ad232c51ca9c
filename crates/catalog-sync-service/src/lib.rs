//! # Catalog Sync Service
//!
//! Top-level binary wiring together the outbox dispatcher, the in-process
//! broker, the search-indexer consumer group (the projector), and the
//! reconciler into one running process (C12–C14).

pub mod config;
pub mod supervisor;

pub use config::CatalogSyncConfig;
pub use supervisor::Supervisor;
