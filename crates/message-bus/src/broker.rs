use crate::error::{BrokerError, BrokerResult};
use crate::message::{Message, MessageBatch};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// A single topic's append-only log plus its offset generator.
/// Offsets start at 1 and never rewind, per the topic-partition invariant.
struct Partition {
    log: RwLock<Vec<Message>>,
    offset_gen: AtomicI64,
}

impl Partition {
    fn new() -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            offset_gen: AtomicI64::new(0),
        }
    }

    fn append(&self, mut message: Message) -> Message {
        let offset = self.offset_gen.fetch_add(1, Ordering::SeqCst) + 1;
        message.offset = Some(offset);
        self.log.write().expect("partition log lock poisoned").push(message.clone());
        message
    }
}

/// Per-group subscription and offset-commit state.
struct GroupState {
    subscribed_topics: Mutex<Vec<String>>,
    committed_offsets: DashMap<String, i64>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            subscribed_topics: Mutex::new(Vec::new()),
            committed_offsets: DashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerStats {
    pub topics: usize,
    pub groups: usize,
    pub total_messages: usize,
}

/// In-process partitioned, offset-addressed broker. One `Partition` per
/// topic, one `GroupState` per consumer group; both held in a `DashMap` so
/// publish/poll/commit never block on an unrelated topic or group.
///
/// Deliberately in-memory and swappable: anything implementing the same
/// publish/subscribe/poll/commit contract (a Kafka-backed broker, say) can
/// stand in for this one without the rest of the substrate noticing.
pub struct Broker {
    topics: DashMap<String, Partition>,
    groups: DashMap<String, GroupState>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            groups: DashMap::new(),
        }
    }

    fn partition(&self, topic: &str) -> dashmap::mapref::one::Ref<'_, String, Partition> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(Partition::new)
            .downgrade()
    }

    /// Assigns the next offset for the message's topic and appends it.
    /// Atomic per partition; infallible for the in-memory implementation.
    pub fn publish(&self, message: Message) -> Message {
        let partition = self.partition(&message.topic);
        let published = partition.append(message);
        debug!(topic = %published.topic, offset = ?published.offset, "published message");
        published
    }

    /// All messages are appended to their own topic's partition; per-topic
    /// ordering within the input is preserved, but this is not a single
    /// cross-topic atomic operation.
    pub fn publish_batch(&self, messages: Vec<Message>) -> Vec<Message> {
        messages.into_iter().map(|m| self.publish(m)).collect()
    }

    /// Idempotent: creates group state if absent, defaults committed offset
    /// to 0 for any newly added topic.
    pub fn subscribe(&self, group_id: &str, topics: &[String]) {
        let group = self.groups.entry(group_id.to_string()).or_insert_with(GroupState::new);
        let mut subscribed = group.subscribed_topics.lock().expect("group lock poisoned");
        for topic in topics {
            if !subscribed.contains(topic) {
                subscribed.push(topic.clone());
                group.committed_offsets.entry(topic.clone()).or_insert(0);
            }
        }
    }

    /// Returns up to `max_messages` messages from the first subscribed topic
    /// (by subscription order) that has data past the group's committed
    /// offset. Never blocks; an empty batch is returned, not an error, when
    /// nothing is available.
    pub fn poll(&self, group_id: &str, max_messages: usize) -> BrokerResult<MessageBatch> {
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| BrokerError::UnknownGroup(group_id.to_string()))?;
        let subscribed = group.subscribed_topics.lock().expect("group lock poisoned").clone();

        for topic in &subscribed {
            let committed = *group.committed_offsets.get(topic).map(|v| *v).get_or_insert(0);
            if let Some(partition) = self.topics.get(topic) {
                let log = partition.log.read().expect("partition log lock poisoned");
                let pending: Vec<Message> = log
                    .iter()
                    .filter(|m| m.offset.unwrap_or(0) > committed)
                    .take(max_messages)
                    .cloned()
                    .collect();
                if !pending.is_empty() {
                    return Ok(MessageBatch::new(topic.clone(), group_id, pending));
                }
            }
        }
        Ok(MessageBatch::empty(
            subscribed.first().cloned().unwrap_or_default(),
            group_id,
        ))
    }

    /// Sets `committedOffset[topic] = max(current, offset)`. Commits below
    /// the current value are no-ops, matching the coalescing contract
    /// described for consumer workers.
    pub fn commit(&self, group_id: &str, topic: &str, offset: i64) -> BrokerResult<()> {
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| BrokerError::UnknownGroup(group_id.to_string()))?;
        group
            .committed_offsets
            .entry(topic.to_string())
            .and_modify(|current| {
                if offset > *current {
                    *current = offset;
                } else if offset < *current {
                    warn!(group_id, topic, offset, current = *current, "commit below current offset ignored");
                }
            })
            .or_insert(offset);
        Ok(())
    }

    pub fn committed_offset(&self, group_id: &str, topic: &str) -> Option<i64> {
        self.groups
            .get(group_id)
            .and_then(|g| g.committed_offsets.get(topic).map(|v| *v))
    }

    pub fn stats(&self) -> BrokerStats {
        let total_messages = self
            .topics
            .iter()
            .map(|entry| entry.log.read().expect("partition log lock poisoned").len())
            .sum();
        BrokerStats {
            topics: self.topics.len(),
            groups: self.groups.len(),
            total_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_assigns_monotonic_offsets() {
        let broker = Broker::new();
        let first = broker.publish(Message::new("product-events", "ProductCreated", "a", "1"));
        let second = broker.publish(Message::new("product-events", "ProductCreated", "b", "1"));
        assert_eq!(first.offset, Some(1));
        assert_eq!(second.offset, Some(2));
    }

    #[test]
    fn poll_against_unknown_group_errors() {
        let broker = Broker::new();
        let result = broker.poll("no-such-group", 10);
        assert!(matches!(result, Err(BrokerError::UnknownGroup(_))));
    }

    #[test]
    fn poll_empty_topic_returns_empty_batch_not_error() {
        let broker = Broker::new();
        broker.subscribe("search-indexer", &["product-events".to_string()]);
        let batch = broker.poll("search-indexer", 10).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn poll_returns_messages_past_committed_offset() {
        let broker = Broker::new();
        broker.subscribe("search-indexer", &["product-events".to_string()]);
        broker.publish(Message::new("product-events", "ProductCreated", "a", "1"));
        broker.publish(Message::new("product-events", "ProductCreated", "b", "1"));

        let batch = broker.poll("search-indexer", 10).unwrap();
        assert_eq!(batch.messages.len(), 2);
        assert_eq!(batch.start_offset, Some(1));
        assert_eq!(batch.end_offset, Some(2));

        broker.commit("search-indexer", "product-events", 1).unwrap();
        let batch = broker.poll("search-indexer", 10).unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].offset, Some(2));
    }

    #[test]
    fn commit_below_current_is_noop() {
        let broker = Broker::new();
        broker.subscribe("g", &["t".to_string()]);
        broker.commit("g", "t", 5).unwrap();
        broker.commit("g", "t", 2).unwrap();
        assert_eq!(broker.committed_offset("g", "t"), Some(5));
    }

    #[test]
    fn batch_handler_sees_strict_offset_order() {
        let broker = Broker::new();
        broker.subscribe("g", &["t".to_string()]);
        broker.publish(Message::new("t", "E", "A", "k"));
        broker.publish(Message::new("t", "E", "B", "k"));
        broker.publish(Message::new("t", "E", "C", "k"));

        let batch = broker.poll("g", 10).unwrap();
        let payloads: Vec<&str> = batch.messages.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, vec!["A", "B", "C"]);
    }
}
