//! Periodic and on-demand resync from the write store into the search
//! index (C10). Runs on its own schedule and never touches the consumer
//! workers directly — the index is the only thing it shares with them.

use crate::config::ReconcilerConfig;
use crate::error::ReconcilerResult;
use crate::metrics::ReconcilerMetrics;
use crate::store::ProductStore;
use chrono::Utc;
use projector::{ElasticsearchClient, ProjectedDocument};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Reconciler<S: ProductStore> {
    store: Arc<S>,
    search: Arc<ElasticsearchClient>,
    config: ReconcilerConfig,
    metrics: Option<ReconcilerMetrics>,
    cancel: CancellationToken,
}

impl<S: ProductStore + 'static> Reconciler<S> {
    pub fn new(store: Arc<S>, search: Arc<ElasticsearchClient>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            search,
            config,
            metrics: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcilerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawns the incremental-sync loop as a background task. `fullSync` is
    /// not scheduled — callers invoke it explicitly at cold start or for
    /// operator-triggered recovery (see spec.md §4.8, scenario 5).
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.incremental_loop().await })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn incremental_loop(self: Arc<Self>) {
        info!(
            interval_ms = self.config.incremental_interval.as_millis(),
            "incremental reconciliation loop started"
        );
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.incremental_interval) => {}
            }
            match self.incremental_sync().await {
                Ok(count) => info!(documents = count, "incremental sync cycle complete"),
                Err(e) => {
                    error!(error = ?e, "incremental sync cycle failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.sync_errors_total.inc();
                    }
                }
            }
        }
        info!("incremental reconciliation loop stopped");
    }

    /// Pages through the entire write store at `batch_size` per page,
    /// upserting a document per product. Used for cold start and recovery
    /// (scenario: wipe the index, run `full_sync`, every product has a
    /// matching document afterward).
    pub async fn full_sync(&self) -> ReconcilerResult<u64> {
        let mut cursor: Option<String> = None;
        let mut total = 0u64;

        loop {
            let page = self.store.fetch_page(cursor.as_deref(), self.config.batch_size).await?;
            let page_len = page.len();
            if page_len == 0 {
                break;
            }

            for row in &page {
                let doc = ProjectedDocument::from_write_store(
                    &row.to_payload(),
                    row.click_count,
                    row.purchase_count,
                    row.inventory_count,
                );
                self.search.upsert(&doc).await?;
                total += 1;
            }
            if let Some(metrics) = &self.metrics {
                metrics.documents_reconciled_total.inc_by(page_len as u64);
            }
            debug!(page_size = page_len, total, "full sync page upserted");

            cursor = page.last().map(|row| row.product_id.clone());
            if (page_len as i64) < self.config.batch_size {
                break;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.full_syncs_total.inc();
        }
        info!(total, "full sync complete");
        Ok(total)
    }

    /// Selects products updated within the configured lookback window and
    /// upserts each. Counters come straight from the write store, which the
    /// reconciler treats as authoritative — this is what keeps a scheduled
    /// resync from stomping on counters the projector maintains atomically
    /// in the index (spec.md §4.8).
    pub async fn incremental_sync(&self) -> ReconcilerResult<u64> {
        let since = Utc::now() - chrono::Duration::from_std(self.config.incremental_window).unwrap_or_default();
        let rows = self.store.fetch_updated_since(since).await?;
        let count = rows.len() as u64;

        for row in &rows {
            let doc = ProjectedDocument::from_write_store(
                &row.to_payload(),
                row.click_count,
                row.purchase_count,
                row.inventory_count,
            );
            self.search.upsert(&doc).await?;
        }

        if let Some(metrics) = &self.metrics {
            metrics.incremental_syncs_total.inc();
            metrics.documents_reconciled_total.inc_by(count);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ReconcilerResult as Result;
    use crate::store::{ProductRow, ProductStore};
    use async_trait::async_trait;
    use catalog_events::ProductAttributes;
    use chrono::{DateTime, Utc};

    struct FakeStore {
        rows: Vec<ProductRow>,
    }

    fn row(id: &str, updated_at: DateTime<Utc>) -> ProductRow {
        ProductRow {
            product_id: id.to_string(),
            name: "Widget".to_string(),
            description: "desc".to_string(),
            categories: vec![],
            price: 10.0,
            sku: "SKU".to_string(),
            attributes: sqlx::types::Json(ProductAttributes::new()),
            images: vec![],
            created_at: Utc::now(),
            updated_at,
            click_count: 3,
            purchase_count: 1,
            inventory_count: 2,
        }
    }

    #[async_trait]
    impl ProductStore for FakeStore {
        async fn fetch_page(&self, after: Option<&str>, limit: i64) -> Result<Vec<ProductRow>> {
            let start = match after {
                Some(cursor) => self
                    .rows
                    .iter()
                    .position(|r| r.product_id == cursor)
                    .map(|i| i + 1)
                    .unwrap_or(self.rows.len()),
                None => 0,
            };
            Ok(self.rows[start..].iter().take(limit as usize).cloned().collect())
        }

        async fn fetch_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<ProductRow>> {
            Ok(self.rows.iter().filter(|r| r.updated_at >= since).cloned().collect())
        }
    }

    // `ElasticsearchClient` requires a live transport to construct, so these
    // cases exercise the cursor-pagination and window-selection logic the
    // reconciler relies on directly; full upsert behavior is covered in
    // `projector`'s own tests via `ProjectedDocument`.
    #[tokio::test]
    async fn cursor_pagination_covers_every_row_without_overlap() {
        let store = FakeStore {
            rows: vec![row("1", Utc::now()), row("2", Utc::now()), row("3", Utc::now())],
        };

        let page1 = store.fetch_page(None, 2).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].product_id, "1");
        assert_eq!(page1[1].product_id, "2");

        let cursor = page1.last().unwrap().product_id.clone();
        let page2 = store.fetch_page(Some(&cursor), 2).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].product_id, "3");

        let page3 = store.fetch_page(Some("3"), 2).await.unwrap();
        assert!(page3.is_empty());
    }

    #[tokio::test]
    async fn updated_since_excludes_rows_outside_the_window() {
        let now = Utc::now();
        let store = FakeStore {
            rows: vec![
                row("stale", now - chrono::Duration::hours(2)),
                row("fresh", now - chrono::Duration::minutes(5)),
            ],
        };

        let recent = store.fetch_updated_since(now - chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].product_id, "fresh");
    }
}
