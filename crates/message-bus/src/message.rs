use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Immutable envelope carried by the broker. `offset` is `None` until the
/// broker assigns one on publish; every other field is set by the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub event_type: String,
    pub payload: String,
    pub headers: HashMap<String, String>,
    pub partition_key: String,
    pub timestamp: DateTime<Utc>,
    pub offset: Option<i64>,
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
        partition_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            event_type: event_type.into(),
            payload: payload.into(),
            headers: HashMap::new(),
            partition_key: partition_key.into(),
            timestamp: Utc::now(),
            offset: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// The `retry-count` header, defaulting to 0 when absent or unparseable.
    pub fn retry_count(&self) -> u32 {
        self.headers
            .get("retry-count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_retry_count(&mut self, count: u32) {
        self.headers.insert("retry-count".to_string(), count.to_string());
    }
}

/// A contiguous-offset group of messages for one topic/consumer-group pair.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub batch_id: Uuid,
    pub topic: String,
    pub consumer_group: String,
    pub partition_id: String,
    pub messages: Vec<Message>,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl MessageBatch {
    pub fn new(topic: impl Into<String>, consumer_group: impl Into<String>, messages: Vec<Message>) -> Self {
        let start_offset = messages.first().and_then(|m| m.offset);
        let end_offset = messages.last().and_then(|m| m.offset);
        let topic = topic.into();
        Self {
            batch_id: Uuid::new_v4(),
            partition_id: topic.clone(),
            topic,
            consumer_group: consumer_group.into(),
            messages,
            start_offset,
            end_offset,
            created_at: Utc::now(),
        }
    }

    pub fn empty(topic: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self::new(topic, consumer_group, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_count_defaults_to_zero() {
        let msg = Message::new("product-events", "ProductCreated", "{}", "42");
        assert_eq!(msg.retry_count(), 0);
    }

    #[test]
    fn retry_count_reads_header() {
        let msg = Message::new("product-events", "ProductCreated", "{}", "42")
            .with_header("retry-count", "2");
        assert_eq!(msg.retry_count(), 2);
    }

    #[test]
    fn empty_batch_has_no_offsets() {
        let batch = MessageBatch::empty("product-events", "search-indexer");
        assert!(batch.is_empty());
        assert_eq!(batch.start_offset, None);
        assert_eq!(batch.end_offset, None);
    }

    #[test]
    fn batch_offsets_span_messages() {
        let mut a = Message::new("t", "E", "a", "k");
        a.offset = Some(1);
        let mut b = Message::new("t", "E", "b", "k");
        b.offset = Some(2);
        let batch = MessageBatch::new("t", "g", vec![a, b]);
        assert_eq!(batch.start_offset, Some(1));
        assert_eq!(batch.end_offset, Some(2));
    }
}
