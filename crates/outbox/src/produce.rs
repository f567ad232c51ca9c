//! Producer façade for the business layer (C11): `storeEvent` inside the
//! business transaction. Serialization errors surface synchronously so the
//! caller's transaction rolls back; nothing here talks to the broker.

use crate::error::OutboxResult;
use crate::store::{OutboxEvent, OutboxStore};
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// Serializes `event_data` and inserts the resulting outbox row within
/// `tx`. MUST be called inside the same transaction as the business
/// mutation it accompanies — the outbox's durability guarantee otherwise
/// does not hold.
pub async fn store_event<S: OutboxStore, T: Serialize>(
    store: &S,
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: Uuid,
    aggregate_type: impl Into<String>,
    event_type: impl Into<String>,
    event_data: &T,
) -> OutboxResult<OutboxEvent> {
    let event_data = serde_json::to_value(event_data)?;
    let event = OutboxEvent::new(aggregate_id, aggregate_type, event_type, event_data);
    store.insert(tx, &event).await?;
    Ok(event)
}
