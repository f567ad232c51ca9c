//! The tagged event variants the catalog write store emits.
//!
//! Dispatch on `eventType` (the serde tag) rather than any downcasting —
//! see the projector crate for the consumer side of this contract.

use crate::ProductAttributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fully materialized product aggregate as handed off by the write-store
/// adapter. Sub-collections (categories, images) are resolved eagerly;
/// the projector never triggers lazy loads of its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductPayload {
    pub product_id: String,
    pub name: String,
    pub description: String,
    pub categories: Vec<String>,
    pub price: f64,
    pub sku: String,
    pub attributes: ProductAttributes,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product: ProductPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductUpdated {
    pub product: ProductPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDeleted {
    pub product_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductViewed {
    pub product_id: String,
    pub viewed_at: DateTime<Utc>,
    pub viewer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPurchased {
    pub product_id: String,
    pub purchased_at: DateTime<Utc>,
    pub quantity: u32,
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryChange {
    pub product_id: String,
    pub delta: i64,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInventoryChanged {
    pub change: InventoryChange,
}

/// The full set of domain events the catalog write store can emit, tagged
/// on the wire by `eventType` so consumers dispatch without reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum CatalogEvent {
    ProductCreated(ProductCreated),
    ProductUpdated(ProductUpdated),
    ProductDeleted(ProductDeleted),
    ProductViewed(ProductViewed),
    ProductPurchased(ProductPurchased),
    ProductInventoryChanged(ProductInventoryChanged),
}

impl CatalogEvent {
    /// The `eventType` discriminant, also used as the outbox row's
    /// `event_type` column and the `event-type` header on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            CatalogEvent::ProductCreated(_) => "ProductCreated",
            CatalogEvent::ProductUpdated(_) => "ProductUpdated",
            CatalogEvent::ProductDeleted(_) => "ProductDeleted",
            CatalogEvent::ProductViewed(_) => "ProductViewed",
            CatalogEvent::ProductPurchased(_) => "ProductPurchased",
            CatalogEvent::ProductInventoryChanged(_) => "ProductInventoryChanged",
        }
    }

    /// The aggregate id every variant carries, used as the outbox row's
    /// `aggregate_id` and the broker's `partitionKey`.
    pub fn product_id(&self) -> &str {
        match self {
            CatalogEvent::ProductCreated(e) => &e.product.product_id,
            CatalogEvent::ProductUpdated(e) => &e.product.product_id,
            CatalogEvent::ProductDeleted(e) => &e.product_id,
            CatalogEvent::ProductViewed(e) => &e.product_id,
            CatalogEvent::ProductPurchased(e) => &e.product_id,
            CatalogEvent::ProductInventoryChanged(e) => &e.change.product_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product() -> ProductPayload {
        ProductPayload {
            product_id: "42".to_string(),
            name: "Widget".to_string(),
            description: "A fine widget".to_string(),
            categories: vec!["tools".to_string()],
            price: 19.99,
            sku: "WID-1".to_string(),
            attributes: Default::default(),
            images: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn event_type_matches_variant() {
        let event = CatalogEvent::ProductCreated(ProductCreated {
            product: sample_product(),
        });
        assert_eq!(event.event_type(), "ProductCreated");
        assert_eq!(event.product_id(), "42");
    }

    #[test]
    fn serde_tag_round_trips() {
        let event = CatalogEvent::ProductDeleted(ProductDeleted {
            product_id: "7".to_string(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"eventType\":\"ProductDeleted\""));
        let back: CatalogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "ProductDeleted");
    }
}
