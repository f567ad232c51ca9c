//! Event-type dispatch over `product-events` into the search index (C9).
//!
//! Runs as a `BatchHandler` rather than a per-message `MessageHandler` so
//! that a `ProductUpdated` and a racing `ProductViewed` for the same
//! product are applied in the offset order the broker assigned them,
//! instead of racing each other across parallel dispatch.

use crate::document::ProjectedDocument;
use crate::metrics::ProjectorMetrics;
use crate::search::{Counter, ElasticsearchClient};
use async_trait::async_trait;
use catalog_events::CatalogEvent;
use consumer_runtime::BatchHandler;
use idempotent_consumer::{IdempotencyGuard, ProcessingResult};
use message_bus::{Message, MessageBatch};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct ProjectorHandler {
    search: Arc<ElasticsearchClient>,
    idempotency: Arc<IdempotencyGuard>,
    metrics: Option<ProjectorMetrics>,
}

impl ProjectorHandler {
    pub fn new(search: Arc<ElasticsearchClient>, idempotency: Arc<IdempotencyGuard>) -> Self {
        Self {
            search,
            idempotency,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ProjectorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn handle_one(&self, message: &Message) -> anyhow::Result<()> {
        let idempotency_key = message
            .headers
            .get("idempotency-key")
            .cloned()
            .unwrap_or_else(|| message.id.to_string());

        let search = Arc::clone(&self.search);
        let payload = message.payload.clone();
        let metrics = self.metrics.clone();

        let outcome = self
            .idempotency
            .process_if_new(&idempotency_key, async move {
                apply_event(&search, &payload, metrics.as_ref()).await
            })
            .await?;

        match outcome {
            ProcessingResult::Success => {}
            ProcessingResult::AlreadyProcessed => {
                debug!(idempotency_key, "event already applied, skipping");
                if let Some(metrics) = &self.metrics {
                    metrics.duplicates_skipped.inc();
                }
            }
            ProcessingResult::Failed(reason) => {
                anyhow::bail!("projector application failed: {reason}");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchHandler for ProjectorHandler {
    /// A failure applying one event must not stop the rest of the batch
    /// from being reported — otherwise a single poison event would wedge
    /// this consumer's offset forever (the worker relies on a per-message
    /// verdict to retry/dead-letter and keep moving).
    async fn handle(&self, batch: &MessageBatch) -> Vec<anyhow::Result<()>> {
        let mut outcomes = Vec::with_capacity(batch.messages.len());
        for message in &batch.messages {
            outcomes.push(self.handle_one(message).await);
        }
        outcomes
    }
}

/// Deserialization failures are terminal for the message — there is no
/// value in retrying bad bytes, so they propagate as-is and the worker's
/// retry policy dead-letters them directly rather than backing off.
async fn apply_event(
    search: &ElasticsearchClient,
    payload: &str,
    metrics: Option<&ProjectorMetrics>,
) -> anyhow::Result<()> {
    let event: CatalogEvent = serde_json::from_str(payload)?;

    match event {
        CatalogEvent::ProductCreated(e) => {
            let doc = ProjectedDocument::from_product(&e.product);
            search.upsert(&doc).await?;
            if let Some(metrics) = metrics {
                metrics.documents_upserted.inc();
            }
        }
        CatalogEvent::ProductUpdated(e) => {
            let existing = search.get(&e.product.product_id).await?;
            let doc = match existing {
                Some(existing) => existing.apply_update(&e.product),
                None => {
                    warn!(
                        product_id = %e.product.product_id,
                        "ProductUpdated for a document missing from the index, treating as create"
                    );
                    ProjectedDocument::from_product(&e.product)
                }
            };
            search.upsert(&doc).await?;
            if let Some(metrics) = metrics {
                metrics.documents_upserted.inc();
            }
        }
        CatalogEvent::ProductDeleted(e) => {
            search.delete(&e.product_id).await?;
            if let Some(metrics) = metrics {
                metrics.documents_deleted.inc();
            }
        }
        CatalogEvent::ProductViewed(e) => {
            if let Err(err) = search.increment_with_fallback(&e.product_id, Counter::Click, 1).await {
                error!(product_id = %e.product_id, error = %err, "atomic click increment failed");
                return Err(err.into());
            }
            if let Some(metrics) = metrics {
                metrics.counters_incremented.inc();
            }
        }
        CatalogEvent::ProductPurchased(e) => {
            let quantity = e.quantity.max(1) as i64;
            if let Err(err) = search.increment_with_fallback(&e.product_id, Counter::Purchase, quantity).await {
                error!(product_id = %e.product_id, error = %err, "atomic purchase increment failed");
                return Err(err.into());
            }
            if let Some(metrics) = metrics {
                metrics.counters_incremented.inc();
            }
        }
        CatalogEvent::ProductInventoryChanged(e) => {
            let product_id = e.change.product_id.clone();
            if let Err(err) = search.increment_with_fallback(&product_id, Counter::Inventory, e.change.delta).await {
                error!(product_id = %product_id, error = %err, "atomic inventory increment failed");
                return Err(err.into());
            }
            if let Some(metrics) = metrics {
                metrics.counters_incremented.inc();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_events::{ProductDeleted, ProductPayload};
    use std::collections::HashMap as StdHashMap;

    fn sample_product() -> ProductPayload {
        ProductPayload {
            product_id: "42".to_string(),
            name: "Widget".to_string(),
            description: "desc".to_string(),
            categories: vec![],
            price: 10.0,
            sku: "W1".to_string(),
            attributes: StdHashMap::new(),
            images: vec![],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn product_deleted_serializes_with_event_type_tag() {
        let event = CatalogEvent::ProductDeleted(ProductDeleted {
            product_id: "42".to_string(),
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: CatalogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.product_id(), "42");
        let _ = sample_product();
    }
}
