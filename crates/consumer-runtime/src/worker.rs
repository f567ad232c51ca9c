use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_bus::{Broker, Message, MessageBatch};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Invoked once per message when the worker is configured with a message
/// handler. Messages within a batch are dispatched to this handler in
/// parallel — there is no per-worker ordering guarantee in this mode.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

/// Invoked once per batch when the worker is configured with a batch
/// handler. Messages are presented in offset order. The returned vector
/// must have exactly one entry per `batch.messages`, in the same order,
/// so the worker can drive retry/dead-letter/offset-advance per message
/// the same way it does for `Handler::Message` — a single failing
/// message must never abort reporting for the rest of the batch, or the
/// worker has no way to tell a poison message from a healthy one.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: &MessageBatch) -> Vec<anyhow::Result<()>>;
}

pub enum Handler {
    Message(Arc<dyn MessageHandler>),
    Batch(Arc<dyn BatchHandler>),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl WorkerConfig {
    /// `pubsub.consumer.*` configuration surface (spec.md §6); all optional
    /// tunables, falling back to the documented default on parse failure
    /// or absence.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse("PUBSUB_CONSUMER_BATCH_SIZE", defaults.batch_size),
            poll_interval: Duration::from_millis(env_parse(
                "PUBSUB_CONSUMER_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            max_retries: env_parse("PUBSUB_CONSUMER_MAX_RETRIES", defaults.max_retries),
            retry_delay: Duration::from_millis(env_parse(
                "PUBSUB_CONSUMER_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Default, Clone)]
pub struct WorkerStats {
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub dead_letter_messages: u64,
    pub last_consume_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct WorkerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

/// One polling/dispatch loop with its own consumer identity
/// (`groupId + "-worker-" + i`), and therefore its own committed-offset
/// cursor from the broker's point of view. Multiple workers sharing a
/// logical group provide parallelism without true partition rebalancing.
pub struct ConsumerWorker {
    pub worker_id: String,
    group_id: String,
    topics: Vec<String>,
    broker: Arc<Broker>,
    handler: Handler,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    last_consume_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerWorker {
    pub fn new(
        group_id: impl Into<String>,
        index: usize,
        topics: Vec<String>,
        broker: Arc<Broker>,
        handler: Handler,
        config: WorkerConfig,
    ) -> Self {
        let group_id = group_id.into();
        let worker_id = format!("{}-worker-{}", group_id, index);
        broker.subscribe(&worker_id, &topics);
        Self {
            worker_id,
            group_id,
            topics,
            broker,
            handler,
            config,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(WorkerCounters::default()),
            last_consume_at: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Each worker subscribes under its own group id (`worker_id`) so its
    /// committed-offset cursor is independent of its siblings, per the
    /// consumer-group factory's fan-out contract.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            worker.run_loop().await;
        });
        *self.task.lock().await = Some(handle);
    }

    async fn run_loop(self: Arc<Self>) {
        info!(worker_id = %self.worker_id, topics = ?self.topics, "consumer worker started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let batch = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = async { self.broker.poll(&self.worker_id, self.config.batch_size) } => result,
            };
            match batch {
                Ok(batch) if !batch.is_empty() => {
                    self.process_batch(&batch).await;
                    *self.last_consume_at.lock().await = Some(Utc::now());
                }
                Ok(_) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(worker_id = %self.worker_id, error = %e, "poll failed");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!(worker_id = %self.worker_id, "consumer worker stopped");
    }

    async fn process_batch(&self, batch: &MessageBatch) {
        match &self.handler {
            Handler::Batch(handler) => {
                let outcomes = handler.handle(batch).await;
                debug_assert_eq!(outcomes.len(), batch.messages.len(), "BatchHandler must report one outcome per message");

                let mut max_committed: i64 = 0;
                for (message, outcome) in batch.messages.iter().zip(outcomes.into_iter()) {
                    match outcome {
                        Ok(()) => {
                            self.counters.processed.fetch_add(1, Ordering::Relaxed);
                            max_committed = max_committed.max(message.offset.unwrap_or(0));
                        }
                        Err(e) => {
                            self.counters.failed.fetch_add(1, Ordering::Relaxed);
                            let offset = message.offset.unwrap_or(0);
                            if self.handle_failure(message.clone(), e).await {
                                // dead-lettered: advance past the poison message rather than stall
                                max_committed = max_committed.max(offset);
                            }
                        }
                    }
                }
                if max_committed > 0 {
                    let _ = self.broker.commit(&self.worker_id, &batch.topic, max_committed);
                }
            }
            Handler::Message(handler) => {
                let results = futures::future::join_all(batch.messages.iter().map(|message| {
                    let handler = Arc::clone(handler);
                    let message = message.clone();
                    async move {
                        let outcome = handler.handle(&message).await;
                        (message, outcome)
                    }
                }))
                .await;

                let mut max_committed: i64 = 0;
                for (message, outcome) in results {
                    match outcome {
                        Ok(()) => {
                            self.counters.processed.fetch_add(1, Ordering::Relaxed);
                            max_committed = max_committed.max(message.offset.unwrap_or(0));
                        }
                        Err(e) => {
                            self.counters.failed.fetch_add(1, Ordering::Relaxed);
                            let offset = message.offset.unwrap_or(0);
                            if self.handle_failure(message, e).await {
                                // dead-lettered: advance past the poison message rather than stall
                                max_committed = max_committed.max(offset);
                            }
                        }
                    }
                }
                if max_committed > 0 {
                    let _ = self.broker.commit(&self.worker_id, &batch.topic, max_committed);
                }
            }
        }
    }

    /// `commit(max(current, msg.offset))` coalescing means a permanently
    /// failing message in the middle of a batch has its offset skipped
    /// once a higher offset commits — dead-lettering trades strict
    /// ordering for liveness, by design.
    /// Returns `true` when the message was dead-lettered (caller must then
    /// advance the offset past it), `false` when a retry was scheduled.
    async fn handle_failure(&self, message: Message, error: anyhow::Error) -> bool {
        let retry_count = message.retry_count();
        debug!(worker_id = %self.worker_id, message_id = %message.id, retry_count, error = %error, "message handler failed");

        if retry_count < self.config.max_retries {
            let delay = self.config.retry_delay * 2u32.pow(retry_count);
            let broker = Arc::clone(&self.broker);
            let worker_id = self.worker_id.clone();
            let mut retried = message.clone();
            retried.set_retry_count(retry_count + 1);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let republished = broker.publish(retried);
                warn!(worker_id, message_id = %republished.id, retry_count = retry_count + 1, "message rescheduled for retry");
            });
            false
        } else {
            self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
            error!(
                worker_id = %self.worker_id,
                message_id = %message.id,
                retry_count,
                "message dead-lettered after exceeding max retries"
            );
            true
        }
    }

    pub async fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed_messages: self.counters.processed.load(Ordering::Relaxed),
            failed_messages: self.counters.failed.load(Ordering::Relaxed),
            dead_letter_messages: self.counters.dead_lettered.load(Ordering::Relaxed),
            last_consume_at: *self.last_consume_at.lock().await,
        }
    }

    /// Cancels the poll loop, waits up to 5 seconds for it to drain, then
    /// gives up and leaves the task detached (it will observe cancellation
    /// and exit on its next loop iteration regardless).
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_bus::Message;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysFailHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for AlwaysFailHandler {
        async fn handle(&self, _message: &Message) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("handler always fails")
        }
    }

    struct RecordingBatchHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BatchHandler for RecordingBatchHandler {
        async fn handle(&self, batch: &MessageBatch) -> Vec<anyhow::Result<()>> {
            let mut seen = self.seen.lock().await;
            for message in &batch.messages {
                seen.push(message.payload.clone());
            }
            batch.messages.iter().map(|_| Ok(())).collect()
        }
    }

    #[tokio::test]
    async fn retry_then_dead_letter_advances_offset() {
        let broker = Arc::new(Broker::new());
        broker.publish(Message::new("product-events", "ProductUpdated", "p7", "7"));

        let handler = Arc::new(AlwaysFailHandler {
            calls: AtomicUsize::new(0),
        });
        let config = WorkerConfig {
            batch_size: 10,
            poll_interval: Duration::from_millis(5),
            max_retries: 1,
            retry_delay: Duration::from_millis(5),
        };
        let worker = Arc::new(ConsumerWorker::new(
            "search-indexer",
            0,
            vec!["product-events".to_string()],
            Arc::clone(&broker),
            Handler::Message(handler.clone()),
            config,
        ));

        // first delivery: fails, scheduled for one retry
        let batch = broker.poll(&worker.worker_id, 10).unwrap();
        worker.process_batch(&batch).await;
        assert_eq!(worker.stats().await.dead_letter_messages, 0);

        // allow the scheduled retry to republish, then redeliver it
        tokio::time::sleep(Duration::from_millis(20)).await;
        let batch = broker.poll(&worker.worker_id, 10).unwrap();
        assert_eq!(batch.messages[0].retry_count(), 1);
        worker.process_batch(&batch).await;

        let stats = worker.stats().await;
        assert_eq!(stats.dead_letter_messages, 1);
        // offset advanced past the poison message despite the failure
        assert_eq!(broker.committed_offset(&worker.worker_id, "product-events"), Some(2));
    }

    struct FailOnPayloadBatchHandler {
        poison_payload: &'static str,
    }

    #[async_trait]
    impl BatchHandler for FailOnPayloadBatchHandler {
        async fn handle(&self, batch: &MessageBatch) -> Vec<anyhow::Result<()>> {
            batch
                .messages
                .iter()
                .map(|m| {
                    if m.payload == self.poison_payload {
                        Err(anyhow::anyhow!("poison message"))
                    } else {
                        Ok(())
                    }
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn batch_handler_dead_letters_poison_message_and_keeps_consuming() {
        let broker = Arc::new(Broker::new());
        broker.publish(Message::new("t", "E", "A", "k"));
        broker.publish(Message::new("t", "E", "poison", "k"));
        broker.publish(Message::new("t", "E", "C", "k"));

        let handler = Arc::new(FailOnPayloadBatchHandler { poison_payload: "poison" });
        let config = WorkerConfig {
            batch_size: 10,
            poll_interval: Duration::from_millis(5),
            max_retries: 0,
            retry_delay: Duration::from_millis(5),
        };
        let worker = Arc::new(ConsumerWorker::new(
            "g",
            0,
            vec!["t".to_string()],
            Arc::clone(&broker),
            Handler::Batch(handler),
            config,
        ));

        let batch = broker.poll(&worker.worker_id, 10).unwrap();
        worker.process_batch(&batch).await;

        let stats = worker.stats().await;
        assert_eq!(stats.processed_messages, 2);
        assert_eq!(stats.dead_letter_messages, 1);
        // offset advanced past the poison message (the batch's last offset), not stalled on it
        assert_eq!(broker.committed_offset(&worker.worker_id, "t"), Some(3));
    }

    #[tokio::test]
    async fn batch_handler_sees_offset_order() {
        let broker = Arc::new(Broker::new());
        broker.publish(Message::new("t", "E", "A", "k"));
        broker.publish(Message::new("t", "E", "B", "k"));
        broker.publish(Message::new("t", "E", "C", "k"));

        let handler = Arc::new(RecordingBatchHandler {
            seen: Mutex::new(Vec::new()),
        });
        let worker = Arc::new(ConsumerWorker::new(
            "g",
            0,
            vec!["t".to_string()],
            Arc::clone(&broker),
            Handler::Batch(handler.clone()),
            WorkerConfig::default(),
        ));

        let batch = broker.poll(&worker.worker_id, 10).unwrap();
        worker.process_batch(&batch).await;

        let seen = handler.seen.lock().await;
        assert_eq!(*seen, vec!["A", "B", "C"]);
        assert_eq!(broker.committed_offset(&worker.worker_id, "t"), Some(3));
    }
}
