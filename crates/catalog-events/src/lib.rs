//! Domain event schema for the product catalog.
//!
//! Every mutation the catalog write store records is represented here as a
//! tagged variant of [`CatalogEvent`], wrapped in an [`EventEnvelope`] before
//! it crosses the outbox/broker boundary. Consumers (the projector, in
//! particular) match on the tag rather than on any runtime type information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub mod event;

pub use event::{
    CatalogEvent, InventoryChange, ProductCreated, ProductDeleted, ProductInventoryChanged,
    ProductPayload, ProductPurchased, ProductUpdated, ProductViewed,
};

/// Current schema version for all events produced by this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// Envelope wrapping every event on the wire, independent of its payload type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub schema_version: u32,
    pub source: String,
    pub correlation_id: Option<Uuid>,
    pub data: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(source: impl Into<String>, data: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            schema_version: SCHEMA_VERSION,
            source: source.into(),
            correlation_id: None,
            data,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Arbitrary key/value attributes attached to a product (color, material, ...).
pub type ProductAttributes = HashMap<String, String>;
