use crate::broker::Broker;
use crate::message::Message;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for a publisher instance, mirroring the stats surface
/// the teacher's outbox publisher exposes (total published, failures,
/// average batch size, last publish time).
#[derive(Debug, Default)]
struct PublisherStatsInner {
    total_published: AtomicU64,
    total_batches: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct PublisherStats {
    pub total_published: u64,
    pub total_batches: u64,
    pub failures: u64,
    pub average_batch_size: f64,
    pub last_publish_at: Option<DateTime<Utc>>,
}

/// Thin adapter over the broker. Owns no retry policy of its own — on
/// failure the caller (the outbox dispatcher) decides whether and how to
/// retry.
pub struct Publisher {
    broker: Arc<Broker>,
    stats: PublisherStatsInner,
    last_publish_at: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl Publisher {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            stats: PublisherStatsInner::default(),
            last_publish_at: std::sync::Mutex::new(None),
        }
    }

    pub async fn publish(&self, message: Message) -> Message {
        let published = self.broker.publish(message);
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        self.stats.total_batches.fetch_add(1, Ordering::Relaxed);
        *self.last_publish_at.lock().expect("lock poisoned") = Some(Utc::now());
        published
    }

    pub async fn publish_batch(&self, messages: Vec<Message>) -> Vec<Message> {
        let count = messages.len() as u64;
        let published = self.broker.publish_batch(messages);
        self.stats.total_published.fetch_add(count, Ordering::Relaxed);
        self.stats.total_batches.fetch_add(1, Ordering::Relaxed);
        if count > 0 {
            *self.last_publish_at.lock().expect("lock poisoned") = Some(Utc::now());
        }
        published
    }

    pub fn record_failure(&self) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PublisherStats {
        let total_published = self.stats.total_published.load(Ordering::Relaxed);
        let total_batches = self.stats.total_batches.load(Ordering::Relaxed);
        let average_batch_size = if total_batches == 0 {
            0.0
        } else {
            total_published as f64 / total_batches as f64
        };
        PublisherStats {
            total_published,
            total_batches,
            failures: self.stats.failures.load(Ordering::Relaxed),
            average_batch_size,
            last_publish_at: *self.last_publish_at.lock().expect("lock poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_tracks_stats() {
        let broker = Arc::new(Broker::new());
        let publisher = Publisher::new(broker);
        publisher.publish(Message::new("t", "E", "p", "k")).await;
        let stats = publisher.stats();
        assert_eq!(stats.total_published, 1);
        assert_eq!(stats.total_batches, 1);
        assert!(stats.last_publish_at.is_some());
    }

    #[tokio::test]
    async fn publish_batch_tracks_average_size() {
        let broker = Arc::new(Broker::new());
        let publisher = Publisher::new(broker);
        let messages = vec![
            Message::new("t", "E", "a", "k"),
            Message::new("t", "E", "b", "k"),
        ];
        publisher.publish_batch(messages).await;
        let stats = publisher.stats();
        assert_eq!(stats.total_published, 2);
        assert_eq!(stats.total_batches, 1);
        assert_eq!(stats.average_batch_size, 2.0);
    }
}
