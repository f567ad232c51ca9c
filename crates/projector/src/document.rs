//! The search-index document and its derived fields (§4.7 formulas).
//!
//! Derived fields are pure functions of the non-derived ones and are
//! recomputed on every write rather than stored independently, so there is
//! no drift between a document's stored state and what it implies.

use catalog_events::ProductPayload;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Read-model document as maintained in the search index. `click_count`,
/// `purchase_count`, `popularity_score` and `inventory_count` are owned by
/// this projector and the reconciler — never clobbered by a plain
/// field-for-field upsert of a `ProductUpdated` payload, which carries none
/// of them (see [`ProjectedDocument::apply_update`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectedDocument {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub description: String,
    pub categories: Vec<String>,
    pub price: f64,
    pub sku: String,
    pub attributes: catalog_events::ProductAttributes,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub click_count: i64,
    pub purchase_count: i64,
    pub popularity_score: i64,
    /// Running total of `ProductInventoryChanged.delta`; `in_stock` derives
    /// from this rather than from anything the write side sends directly.
    pub inventory_count: i64,

    // Derived — recomputed by `recompute_derived` on every write.
    pub all_text: String,
    pub tags: Vec<String>,
    pub in_stock: bool,
    pub price_range: String,
    pub score_boost: f64,
}

impl ProjectedDocument {
    /// Builds a fresh document from a write-side payload, zeroing the
    /// analytics/inventory counters this projector owns. Used for
    /// `ProductCreated`.
    pub fn from_product(product: &ProductPayload) -> Self {
        let mut doc = Self {
            id: product.product_id.clone(),
            product_id: product.product_id.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            categories: product.categories.clone(),
            price: product.price,
            sku: product.sku.clone(),
            attributes: product.attributes.clone(),
            images: product.images.clone(),
            created_at: product.created_at,
            updated_at: product.updated_at,
            click_count: 0,
            purchase_count: 0,
            popularity_score: 0,
            inventory_count: 0,
            all_text: String::new(),
            tags: Vec::new(),
            in_stock: false,
            price_range: String::new(),
            score_boost: 0.0,
        };
        doc.recompute_derived();
        doc
    }

    /// Applies a `ProductUpdated` payload onto an existing document,
    /// carrying the analytics/inventory counters forward untouched — the
    /// write side never knows about `clickCount`/`purchaseCount`/stock and
    /// must not be able to reset them by re-sending the full product.
    pub fn apply_update(mut self, product: &ProductPayload) -> Self {
        self.name = product.name.clone();
        self.description = product.description.clone();
        self.categories = product.categories.clone();
        self.price = product.price;
        self.sku = product.sku.clone();
        self.attributes = product.attributes.clone();
        self.images = product.images.clone();
        self.updated_at = product.updated_at;
        self.recompute_derived();
        self
    }

    /// Builds a document from write-store state directly, carrying the
    /// authoritative counters the write store holds rather than zeroing
    /// them. Used by the reconciler, which treats the write store (not the
    /// index) as the source of truth for `click_count`/`purchase_count`/
    /// `inventory_count`.
    pub fn from_write_store(
        product: &ProductPayload,
        click_count: i64,
        purchase_count: i64,
        inventory_count: i64,
    ) -> Self {
        let mut doc = Self::from_product(product);
        doc.click_count = click_count;
        doc.purchase_count = purchase_count;
        doc.inventory_count = inventory_count;
        doc.recompute_derived();
        doc
    }

    /// Applies a `ProductInventoryChanged.delta`, recomputing `inStock` and
    /// the fields that depend on it (`tags`).
    pub fn apply_inventory_change(mut self, delta: i64) -> Self {
        self.inventory_count += delta;
        self.recompute_derived();
        self
    }

    pub fn recompute_derived(&mut self) {
        self.popularity_score = self.click_count + 10 * self.purchase_count;
        self.in_stock = self.inventory_count > 0;
        self.price_range = price_range(self.price);
        self.tags = tags(self);
        self.all_text = all_text(self);
        self.score_boost = score_boost(self);
    }
}

/// `"0-50" | "50-100" | "100-200" | "200-500" | "500-1000" | "1000+"` by
/// half-open intervals on price.
pub fn price_range(price: f64) -> String {
    if price < 0.0 {
        "unknown".to_string()
    } else if price < 50.0 {
        "0-50".to_string()
    } else if price < 100.0 {
        "50-100".to_string()
    } else if price < 200.0 {
        "100-200".to_string()
    } else if price < 500.0 {
        "200-500".to_string()
    } else if price < 1000.0 {
        "500-1000".to_string()
    } else {
        "1000+".to_string()
    }
}

/// Union of categories, brand attribute (if present), a price band, and
/// popularity/availability flags. Deduplicated, order not significant.
fn tags(doc: &ProjectedDocument) -> Vec<String> {
    let mut set: BTreeSet<String> = BTreeSet::new();
    for category in &doc.categories {
        set.insert(category.clone());
    }
    if let Some(brand) = doc.attributes.get("brand") {
        set.insert(brand.clone());
    }
    set.insert(if doc.price < 100.0 {
        "budget".to_string()
    } else if doc.price > 500.0 {
        "premium".to_string()
    } else {
        "mid-range".to_string()
    });
    if doc.popularity_score > 50 {
        set.insert("popular".to_string());
    }
    if doc.purchase_count > 100 {
        set.insert("bestseller".to_string());
    }
    if doc.in_stock {
        set.insert("available".to_string());
    }
    set.into_iter().collect()
}

/// Space-joined `name description sku categories… attribute-values…`.
fn all_text(doc: &ProjectedDocument) -> String {
    let mut parts = vec![doc.name.clone(), doc.description.clone(), doc.sku.clone()];
    parts.extend(doc.categories.iter().cloned());
    parts.extend(doc.attributes.values().cloned());
    parts.join(" ")
}

/// `min(2.0, 1.0 + popularityScore/200 + (0.2 if createdAt within 30d) + (0.1 if images non-empty))`.
fn score_boost(doc: &ProjectedDocument) -> f64 {
    let mut score = 1.0 + doc.popularity_score as f64 / 200.0;
    if Utc::now() - doc.created_at < Duration::days(30) {
        score += 0.2;
    }
    if !doc.images.is_empty() {
        score += 0.1;
    }
    score.min(2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> ProductPayload {
        ProductPayload {
            product_id: "42".to_string(),
            name: "Widget".to_string(),
            description: "A fine widget".to_string(),
            categories: vec!["tools".to_string()],
            price: 19.99,
            sku: "WID-1".to_string(),
            attributes: {
                let mut m = HashMap::new();
                m.insert("brand".to_string(), "Acme".to_string());
                m
            },
            images: vec!["img1.png".to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn price_range_boundaries() {
        assert_eq!(price_range(0.0), "0-50");
        assert_eq!(price_range(49.99), "0-50");
        assert_eq!(price_range(50.0), "50-100");
        assert_eq!(price_range(999.99), "500-1000");
        assert_eq!(price_range(1000.0), "1000+");
    }

    #[test]
    fn from_product_computes_derived_fields() {
        let doc = ProjectedDocument::from_product(&sample());
        assert_eq!(doc.price_range, "0-50");
        assert!(doc.tags.contains(&"budget".to_string()));
        assert!(doc.tags.contains(&"Acme".to_string()));
        assert!(!doc.tags.contains(&"available".to_string()), "zero inventory on create");
        assert!(doc.all_text.contains("Widget"));
        assert!(doc.all_text.contains("Acme"));
        // fresh, has images, not in stock: 1.0 + 0 + 0.2 + 0.1
        assert!((doc.score_boost - 1.3).abs() < 1e-9);
    }

    #[test]
    fn inventory_change_flips_in_stock_and_available_tag() {
        let doc = ProjectedDocument::from_product(&sample());
        assert!(!doc.in_stock);
        let doc = doc.apply_inventory_change(5);
        assert!(doc.in_stock);
        assert!(doc.tags.contains(&"available".to_string()));
        let doc = doc.apply_inventory_change(-5);
        assert!(!doc.in_stock);
        assert!(!doc.tags.contains(&"available".to_string()));
    }

    #[test]
    fn apply_update_preserves_counters() {
        let mut doc = ProjectedDocument::from_product(&sample());
        doc.click_count = 80;
        doc.purchase_count = 120;
        doc.inventory_count = 3;
        doc.recompute_derived();

        let mut updated = sample();
        updated.price = 9.99;
        let doc = doc.apply_update(&updated);

        assert_eq!(doc.click_count, 80);
        assert_eq!(doc.purchase_count, 120);
        assert_eq!(doc.inventory_count, 3);
        assert!(doc.in_stock);
        assert_eq!(doc.popularity_score, 80 + 10 * 120);
        assert!(doc.tags.contains(&"popular".to_string()));
        assert!(doc.tags.contains(&"bestseller".to_string()));
        assert_eq!(doc.price, 9.99);
    }

    #[test]
    fn from_write_store_carries_authoritative_counters() {
        let doc = ProjectedDocument::from_write_store(&sample(), 80, 120, 4);
        assert_eq!(doc.click_count, 80);
        assert_eq!(doc.purchase_count, 120);
        assert_eq!(doc.inventory_count, 4);
        assert!(doc.in_stock);
        assert_eq!(doc.popularity_score, 80 + 10 * 120);
    }

    #[test]
    fn score_boost_caps_at_two() {
        let mut doc = ProjectedDocument::from_product(&sample());
        doc.click_count = 10_000;
        doc.recompute_derived();
        assert_eq!(doc.score_boost, 2.0);
    }
}
