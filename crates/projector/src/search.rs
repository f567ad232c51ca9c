//! The Elasticsearch-backed search index for product documents.
//!
//! Counter increments (`clickCount`, `purchaseCount`, `inventoryCount`) go
//! through [`ElasticsearchClient::increment`], a scripted update with
//! `retry_on_conflict` — the contract requires a true atomic increment at
//! the index, not a read-modify-write, because two workers racing on the
//! same product must never lose an increment to a lost update.

use crate::document::ProjectedDocument;
use crate::error::{ProjectorError, ProjectorResult};
use chrono::Utc;
use elasticsearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    params::Refresh,
    DeleteParts, Elasticsearch, GetParts, IndexParts, UpdateParts,
};
use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

/// The counter a `ProductViewed`/`ProductPurchased`/`ProductInventoryChanged`
/// event bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Click,
    Purchase,
    Inventory,
}

impl Counter {
    fn field(self) -> &'static str {
        match self {
            Counter::Click => "click_count",
            Counter::Purchase => "purchase_count",
            Counter::Inventory => "inventory_count",
        }
    }
}

#[derive(Clone)]
pub struct ElasticsearchClient {
    client: Elasticsearch,
    index: String,
}

impl ElasticsearchClient {
    pub async fn new(url: &str, index: &str) -> ProjectorResult<Self> {
        let parsed = Url::parse(url)?;
        let pool = SingleNodeConnectionPool::new(parsed);
        let transport = TransportBuilder::new(pool).build()?;
        let client = Elasticsearch::new(transport);

        let instance = Self {
            client,
            index: index.to_string(),
        };
        instance.ensure_index().await?;
        Ok(instance)
    }

    async fn ensure_index(&self) -> ProjectorResult<()> {
        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index.as_str()]))
            .send()
            .await?;
        if exists.status_code().is_success() {
            return Ok(());
        }

        let body = json!({
            "settings": {
                "number_of_shards": 3,
                "number_of_replicas": 1
            },
            "mappings": {
                "properties": {
                    "id": { "type": "keyword" },
                    "product_id": { "type": "keyword" },
                    "name": { "type": "text", "boost": 2.0 },
                    "description": { "type": "text" },
                    "categories": { "type": "keyword" },
                    "price": { "type": "double" },
                    "sku": { "type": "keyword" },
                    "attributes": { "type": "object", "enabled": false },
                    "images": { "type": "keyword" },
                    "created_at": { "type": "date" },
                    "updated_at": { "type": "date" },
                    "click_count": { "type": "long" },
                    "purchase_count": { "type": "long" },
                    "popularity_score": { "type": "long" },
                    "inventory_count": { "type": "long" },
                    "all_text": { "type": "text" },
                    "tags": { "type": "keyword" },
                    "in_stock": { "type": "boolean" },
                    "price_range": { "type": "keyword" },
                    "score_boost": { "type": "float" }
                }
            }
        });

        self.client
            .indices()
            .create(IndicesCreateParts::Index(&self.index))
            .body(body)
            .send()
            .await?;
        info!(index = %self.index, "created product search index");
        Ok(())
    }

    /// Full upsert for `ProductCreated`/`ProductUpdated`/the reconciler.
    pub async fn upsert(&self, doc: &ProjectedDocument) -> ProjectorResult<()> {
        self.client
            .index(IndexParts::IndexId(&self.index, &doc.id))
            .body(doc)
            .refresh(Refresh::False)
            .send()
            .await?;
        Ok(())
    }

    pub async fn delete(&self, product_id: &str) -> ProjectorResult<()> {
        let response = self
            .client
            .delete(DeleteParts::IndexId(&self.index, product_id))
            .send()
            .await?;
        if response.status_code().as_u16() == 404 {
            warn!(product_id, "delete requested for document absent from index");
        }
        Ok(())
    }

    pub async fn get(&self, product_id: &str) -> ProjectorResult<Option<ProjectedDocument>> {
        let response = self
            .client
            .get(GetParts::IndexId(&self.index, product_id))
            .send()
            .await?;
        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        let body: GetResponse = response.json().await?;
        Ok(body.source)
    }

    /// Atomic increment of `counter` by `delta`, recomputing the fields
    /// that depend on it (`popularity_score`, `in_stock`, `tags`,
    /// `score_boost`) inside the same scripted update. `retry_on_conflict`
    /// handles the version-conflict race between concurrent increments on
    /// the same document without a read-modify-write round trip.
    pub async fn increment(&self, product_id: &str, counter: Counter, delta: i64) -> ProjectorResult<()> {
        let script = json!({
            "source": r#"
                ctx._source[params.field] += params.delta;
                def clicks = ctx._source.click_count;
                def purchases = ctx._source.purchase_count;
                ctx._source.popularity_score = clicks + 10 * purchases;
                ctx._source.in_stock = ctx._source.inventory_count > 0;

                def tags = new HashSet(ctx._source.categories);
                if (ctx._source.attributes.containsKey('brand')) {
                    tags.add(ctx._source.attributes['brand']);
                }
                double price = ctx._source.price;
                if (price < 100.0) { tags.add('budget'); }
                else if (price > 500.0) { tags.add('premium'); }
                else { tags.add('mid-range'); }
                if (ctx._source.popularity_score > 50) { tags.add('popular'); }
                if (purchases > 100) { tags.add('bestseller'); }
                if (ctx._source.in_stock) { tags.add('available'); }
                ctx._source.tags = new ArrayList(tags);

                double boost = 1.0 + (ctx._source.popularity_score / 200.0);
                if (params.recentlyCreated) { boost += 0.2; }
                if (!ctx._source.images.isEmpty()) { boost += 0.1; }
                ctx._source.score_boost = (double) Math.min(2.0, boost);
            "#,
            "lang": "painless",
            "params": {
                "field": counter.field(),
                "delta": delta,
                "recentlyCreated": self.recently_created(product_id).await.unwrap_or(false),
            }
        });

        self.client
            .update(UpdateParts::IndexId(&self.index, product_id))
            .body(json!({ "script": script }))
            .retry_on_conflict(5)
            .send()
            .await?;
        Ok(())
    }

    /// Tries the atomic scripted increment; only on its failure falls back
    /// to a read-modify-write (a warning is logged either way this is not
    /// taken, since the fallback forfeits the conflict-free guarantee).
    pub async fn increment_with_fallback(
        &self,
        product_id: &str,
        counter: Counter,
        delta: i64,
    ) -> ProjectorResult<()> {
        if let Err(err) = self.increment(product_id, counter, delta).await {
            warn!(
                product_id,
                counter = ?counter,
                error = %err,
                "atomic increment failed, falling back to read-modify-write"
            );
            let mut doc = self
                .get(product_id)
                .await?
                .ok_or_else(|| ProjectorError::NotFound(product_id.to_string()))?;
            match counter {
                Counter::Click => doc.click_count += delta,
                Counter::Purchase => doc.purchase_count += delta,
                Counter::Inventory => doc.inventory_count += delta,
            }
            doc.recompute_derived();
            self.upsert(&doc).await?;
        }
        Ok(())
    }

    /// `createdAt within 30d` is evaluated client-side (clock skew vs. a
    /// painless `ZonedDateTime.now()` is not worth chasing) by reading the
    /// document once before the scripted update. Best-effort: a stale read
    /// here only affects the `+0.2` boost term, never correctness.
    async fn recently_created(&self, product_id: &str) -> ProjectorResult<bool> {
        let doc = self.get(product_id).await?;
        Ok(doc
            .map(|d| Utc::now() - d.created_at < chrono::Duration::days(30))
            .unwrap_or(false))
    }
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(rename = "_source")]
    source: Option<ProjectedDocument>,
}
