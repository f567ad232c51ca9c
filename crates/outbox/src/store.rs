//! Durable staging table for domain events, keyed by aggregate.
//!
//! Rows are written by the business-transaction producer (see
//! [`crate::produce::store_event`]) and drained by the [`crate::dispatcher::OutboxDispatcher`].

use crate::error::{OutboxError, OutboxResult};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// A pending (or already-processed) domain event row.
///
/// Invariants: once `processed=true` the row is terminal except for GC;
/// `retry_count` is monotonically non-decreasing; `next_retry_at` is set
/// iff `retry_count > 0` and `processed` is false; `version` increments on
/// every update and backs optimistic-concurrency writes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub version: i32,
}

impl OutboxEvent {
    pub fn new(
        aggregate_id: Uuid,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        event_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            event_data,
            created_at: Utc::now(),
            processed: false,
            processed_at: None,
            retry_count: 0,
            next_retry_at: None,
            error_message: None,
            version: 0,
        }
    }

    /// The `idempotency-key` header value every envelope built from this
    /// row carries.
    pub fn idempotency_key(&self) -> String {
        format!("outbox-event-{}", self.id)
    }

    /// `product -> product-events`, `order -> order-events`,
    /// `user -> user-events`, anything else -> `general-events`.
    pub fn topic(&self) -> &'static str {
        match self.aggregate_type.as_str() {
            "product" => "product-events",
            "order" => "order-events",
            "user" => "user-events",
            _ => "general-events",
        }
    }
}

/// Abstracts database access so the dispatcher can be tested against an
/// in-memory fake without a real Postgres instance.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new event row within the caller's business transaction.
    /// MUST be called inside the same transaction as the business mutation
    /// or the outbox durability guarantee is void.
    async fn insert(&self, tx: &mut Transaction<'_, Postgres>, event: &OutboxEvent) -> OutboxResult<()>;

    /// `processed=false AND retry_count=0`, ordered by `created_at ASC`.
    async fn find_fresh(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>>;

    /// `processed=false AND retry_count IN [1, max_retries) AND
    /// (next_retry_at IS NULL OR next_retry_at <= now)`, ordered by
    /// `created_at ASC`.
    async fn find_for_retry(&self, now: DateTime<Utc>, max_retries: i32, limit: i64) -> OutboxResult<Vec<OutboxEvent>>;

    /// Atomic compare-on-version update: `processed=true, processed_at=ts`.
    async fn mark_processed(&self, id: Uuid, version: i32, ts: DateTime<Utc>) -> OutboxResult<()>;

    /// Atomic compare-on-version update: increments `retry_count`, sets
    /// `next_retry_at` and `error_message`.
    async fn increment_retry(
        &self,
        id: Uuid,
        version: i32,
        next_retry_at: DateTime<Utc>,
        err: &str,
    ) -> OutboxResult<()>;

    /// GC: deletes processed rows older than `cutoff`.
    async fn delete_processed_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64>;

    /// `(pending_count, oldest_pending_age_seconds)`; age is 0 if none pending.
    async fn pending_stats(&self) -> OutboxResult<(i64, i64)>;
}

/// `sqlx`/Postgres-backed implementation. Row claiming in `find_fresh` and
/// `find_for_retry` uses `FOR UPDATE SKIP LOCKED` so multiple dispatcher
/// instances (horizontal scale-out) never block on, or double-publish, the
/// same row — the version-CAS update is still what makes the second
/// claimant's write a no-op.
pub struct SqlxOutboxStore {
    pool: PgPool,
}

impl SqlxOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replay events created since the given timestamp by resetting
    /// `processed`, `retry_count`, `next_retry_at`, and `error_message`.
    pub async fn replay_since(&self, ts: DateTime<Utc>) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed = false,
                processed_at = NULL,
                retry_count = 0,
                next_retry_at = NULL,
                error_message = NULL,
                version = version + 1
            WHERE created_at >= $1
            "#,
        )
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("failed to replay events since timestamp")?;

        Ok(res.rows_affected())
    }

    /// Replay events by id range (inclusive) for operational backfill.
    pub async fn replay_range(&self, from_id: Uuid, to_id: Uuid) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed = false,
                processed_at = NULL,
                retry_count = 0,
                next_retry_at = NULL,
                error_message = NULL,
                version = version + 1
            WHERE id BETWEEN $1 AND $2
            "#,
        )
        .bind(from_id)
        .bind(to_id)
        .execute(&self.pool)
        .await
        .context("failed to replay events by id range")?;

        Ok(res.rows_affected())
    }

    fn row_to_event(row: sqlx::postgres::PgRow) -> OutboxResult<OutboxEvent> {
        Ok(OutboxEvent {
            id: row.try_get("id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            event_data: row.try_get("event_data")?,
            created_at: row.try_get("created_at")?,
            processed: row.try_get("processed")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: row.try_get("retry_count")?,
            next_retry_at: row.try_get("next_retry_at")?,
            error_message: row.try_get("error_message")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl OutboxStore for SqlxOutboxStore {
    async fn insert(&self, tx: &mut Transaction<'_, Postgres>, event: &OutboxEvent) -> OutboxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (
                id, aggregate_id, aggregate_type, event_type, event_data,
                created_at, processed, processed_at, retry_count, next_retry_at,
                error_message, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id)
        .bind(event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(&event.event_type)
        .bind(&event.event_data)
        .bind(event.created_at)
        .bind(event.processed)
        .bind(event.processed_at)
        .bind(event.retry_count)
        .bind(event.next_retry_at)
        .bind(&event.error_message)
        .bind(event.version)
        .execute(&mut **tx)
        .await
        .context("failed to insert event into outbox")?;

        tracing::debug!(event_id = %event.id, event_type = %event.event_type, aggregate_id = %event.aggregate_id, "event inserted into outbox");
        Ok(())
    }

    async fn find_fresh(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, aggregate_type, event_type, event_data,
                   created_at, processed, processed_at, retry_count, next_retry_at,
                   error_message, version
            FROM outbox_events
            WHERE processed = false AND retry_count = 0
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch fresh outbox events")?;

        rows.into_iter()
            .map(Self::row_to_event)
            .collect::<OutboxResult<Vec<_>>>()
    }

    async fn find_for_retry(&self, now: DateTime<Utc>, max_retries: i32, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, aggregate_type, event_type, event_data,
                   created_at, processed, processed_at, retry_count, next_retry_at,
                   error_message, version
            FROM outbox_events
            WHERE processed = false
              AND retry_count BETWEEN 1 AND $1
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY created_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(max_retries - 1)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch retry-eligible outbox events")?;

        rows.into_iter()
            .map(Self::row_to_event)
            .collect::<OutboxResult<Vec<_>>>()
    }

    async fn mark_processed(&self, id: Uuid, version: i32, ts: DateTime<Utc>) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed = true, processed_at = $3, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(version)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("failed to mark event as processed")?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::VersionConflict(id));
        }
        tracing::debug!(event_id = %id, "event marked as processed");
        Ok(())
    }

    async fn increment_retry(
        &self,
        id: Uuid,
        version: i32,
        next_retry_at: DateTime<Utc>,
        err: &str,
    ) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1,
                next_retry_at = $3,
                error_message = $4,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(version)
        .bind(next_retry_at)
        .bind(err)
        .execute(&self.pool)
        .await
        .context("failed to increment retry count")?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::VersionConflict(id));
        }
        tracing::warn!(event_id = %id, error = %err, "event publish failed, retry scheduled");
        Ok(())
    }

    async fn delete_processed_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE processed = true AND processed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("failed to garbage-collect processed outbox events")?;

        Ok(result.rows_affected())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age_seconds
            FROM outbox_events
            WHERE processed = false
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to compute pending stats")?;

        let pending: i64 = rec.try_get("pending").unwrap_or(0);
        let age: i64 = rec.try_get("age_seconds").unwrap_or(0);
        Ok((pending, age))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_derivation_matches_aggregate_type() {
        let product = OutboxEvent::new(Uuid::new_v4(), "product", "ProductCreated", serde_json::json!({}));
        let order = OutboxEvent::new(Uuid::new_v4(), "order", "OrderPlaced", serde_json::json!({}));
        let user = OutboxEvent::new(Uuid::new_v4(), "user", "UserUpdated", serde_json::json!({}));
        let other = OutboxEvent::new(Uuid::new_v4(), "shipment", "ShipmentCreated", serde_json::json!({}));

        assert_eq!(product.topic(), "product-events");
        assert_eq!(order.topic(), "order-events");
        assert_eq!(user.topic(), "user-events");
        assert_eq!(other.topic(), "general-events");
    }

    #[test]
    fn idempotency_key_is_derived_from_id() {
        let event = OutboxEvent::new(Uuid::new_v4(), "product", "ProductCreated", serde_json::json!({}));
        assert_eq!(event.idempotency_key(), format!("outbox-event-{}", event.id));
    }
}
