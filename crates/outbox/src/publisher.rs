//! Publishing targets for drained outbox rows.
//!
//! [`BrokerOutboxPublisher`] is the default: it hands the envelope to the
//! in-process [`message_bus::Broker`]. [`KafkaOutboxPublisher`] is kept as
//! the real-world swap-in, grounded on the same idempotent-producer
//! configuration, for deployments that want an external log instead.

use crate::error::{OutboxError, OutboxResult};
use crate::store::OutboxEvent;
use async_trait::async_trait;
use message_bus::{Message, Publisher};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds the wire envelope for an outbox row per the required header set:
/// `idempotency-key`, `aggregate-id`, `aggregate-type`, `event-type`,
/// `source`, `created-at`.
fn envelope(event: &OutboxEvent) -> Message {
    Message::new(
        event.topic(),
        event.event_type.clone(),
        event.event_data.to_string(),
        event.aggregate_id.to_string(),
    )
    .with_header("idempotency-key", event.idempotency_key())
    .with_header("aggregate-id", event.aggregate_id.to_string())
    .with_header("aggregate-type", event.aggregate_type.clone())
    .with_header("event-type", event.event_type.clone())
    .with_header("source", "outbox")
    .with_header("created-at", event.created_at.to_rfc3339())
}

#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()>;
}

/// Default publisher: drains into the in-process broker.
pub struct BrokerOutboxPublisher {
    publisher: Arc<Publisher>,
}

impl BrokerOutboxPublisher {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl OutboxPublisher for BrokerOutboxPublisher {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()> {
        let message = envelope(event);
        let published = self.publisher.publish(message).await;
        info!(event_id = %event.id, event_type = %event.event_type, topic = %event.topic(), offset = ?published.offset, "event published to broker");
        Ok(())
    }
}

/// Kafka-based publisher, for deployments that want the outbox to drain
/// into a real external log instead of the in-process broker. Requires
/// `enable.idempotence=true`, `acks=all` on the producer to preserve the
/// at-least-once contract without introducing duplicate-on-retry surprises.
pub struct KafkaOutboxPublisher {
    producer: FutureProducer,
}

impl KafkaOutboxPublisher {
    pub fn new(producer: FutureProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl OutboxPublisher for KafkaOutboxPublisher {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()> {
        let topic = event.topic();
        let payload = event.event_data.to_string();
        let key = event.aggregate_id.to_string();
        let idempotency_key = event.idempotency_key();
        let created_at = event.created_at.to_rfc3339();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "idempotency-key",
                value: Some(idempotency_key.as_bytes()),
            })
            .insert(Header {
                key: "aggregate-id",
                value: Some(key.as_bytes()),
            })
            .insert(Header {
                key: "aggregate-type",
                value: Some(event.aggregate_type.as_bytes()),
            })
            .insert(Header {
                key: "event-type",
                value: Some(event.event_type.as_bytes()),
            })
            .insert(Header {
                key: "source",
                value: Some(b"outbox"),
            })
            .insert(Header {
                key: "created-at",
                value: Some(created_at.as_bytes()),
            });

        let record = FutureRecord::to(topic).key(&key).payload(&payload).headers(headers);

        self.producer
            .send(record, Duration::from_secs(30))
            .await
            .map_err(|(err, _)| OutboxError::PublishFailed(format!("kafka publish failed: {}", err)))?;

        info!(event_id = %event.id, event_type = %event.event_type, topic, "event published to kafka");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_bus::Broker;
    use uuid::Uuid;

    #[tokio::test]
    async fn broker_publisher_sets_required_headers() {
        let broker = Arc::new(Broker::new());
        let publisher = Arc::new(Publisher::new(Arc::clone(&broker)));
        broker.subscribe("watch", &["product-events".to_string()]);

        let event = OutboxEvent::new(Uuid::new_v4(), "product", "ProductCreated", serde_json::json!({"id": 1}));
        let outbox_publisher = BrokerOutboxPublisher::new(publisher);
        outbox_publisher.publish(&event).await.unwrap();

        let batch = broker.poll("watch", 10).unwrap();
        assert_eq!(batch.messages.len(), 1);
        let message = &batch.messages[0];
        assert_eq!(message.headers.get("idempotency-key"), Some(&event.idempotency_key()));
        assert_eq!(message.headers.get("aggregate-type"), Some(&"product".to_string()));
        assert_eq!(message.headers.get("source"), Some(&"outbox".to_string()));
    }
}
