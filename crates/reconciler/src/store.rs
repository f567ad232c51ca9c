//! Read access to the write store's `products` table — the reconciler's
//! source of truth both for document content and for the analytics/
//! inventory counters it must not clobber.

use crate::error::ReconcilerResult;
use async_trait::async_trait;
use catalog_events::{ProductAttributes, ProductPayload};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// A `products` row as the write store holds it, counters included. The
/// write store is authoritative for `click_count`/`purchase_count`/
/// `inventory_count` from the reconciler's point of view — the projector
/// mutates them in the index directly, but the row underneath is kept in
/// sync by the same business logic that emits `ProductViewed` etc.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub product_id: String,
    pub name: String,
    pub description: String,
    pub categories: Vec<String>,
    pub price: f64,
    pub sku: String,
    pub attributes: sqlx::types::Json<ProductAttributes>,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub click_count: i64,
    pub purchase_count: i64,
    pub inventory_count: i64,
}

impl ProductRow {
    pub fn to_payload(&self) -> ProductPayload {
        ProductPayload {
            product_id: self.product_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            categories: self.categories.clone(),
            price: self.price,
            sku: self.sku.clone(),
            attributes: self.attributes.0.clone(),
            images: self.images.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Abstracts the write store so the reconciler can be tested against an
/// in-memory fake rather than a real Postgres instance.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Page through all products ordered by `product_id`, `limit` per call.
    /// Returning fewer than `limit` rows signals the caller this was the
    /// last page.
    async fn fetch_page(&self, after_product_id: Option<&str>, limit: i64) -> ReconcilerResult<Vec<ProductRow>>;

    /// Products whose `updated_at >= since`, for the incremental sync.
    async fn fetch_updated_since(&self, since: DateTime<Utc>) -> ReconcilerResult<Vec<ProductRow>>;
}

pub struct SqlxProductStore {
    pool: PgPool,
}

impl SqlxProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for SqlxProductStore {
    async fn fetch_page(&self, after_product_id: Option<&str>, limit: i64) -> ReconcilerResult<Vec<ProductRow>> {
        let rows = match after_product_id {
            Some(cursor) => {
                sqlx::query_as::<_, ProductRow>(
                    r#"
                    SELECT product_id, name, description, categories, price, sku,
                           attributes, images, created_at, updated_at,
                           click_count, purchase_count, inventory_count
                    FROM products
                    WHERE product_id > $1
                    ORDER BY product_id ASC
                    LIMIT $2
                    "#,
                )
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ProductRow>(
                    r#"
                    SELECT product_id, name, description, categories, price, sku,
                           attributes, images, created_at, updated_at,
                           click_count, purchase_count, inventory_count
                    FROM products
                    ORDER BY product_id ASC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn fetch_updated_since(&self, since: DateTime<Utc>) -> ReconcilerResult<Vec<ProductRow>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT product_id, name, description, categories, price, sku,
                   attributes, images, created_at, updated_at,
                   click_count, purchase_count, inventory_count
            FROM products
            WHERE updated_at >= $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
