//! Two independent scheduled drains plus a daily GC janitor (C8).

use crate::metrics::OutboxMetrics;
use crate::publisher::OutboxPublisher;
use crate::store::{OutboxEvent, OutboxStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use resilience::{kafka_config, CircuitBreaker};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// `outbox.batch-size`, default 50.
    pub batch_size: i64,
    /// `outbox.processing-interval-ms`, default 5000.
    pub processing_interval: Duration,
    /// `outbox.retry-interval-ms`, default 10000.
    pub retry_interval: Duration,
    /// `OutboxEvent.retryCount >= max_retries` is dead-lettered, default 5.
    pub max_retries: i32,
    /// `outbox.cleanup-after-days`, default 7.
    pub cleanup_after_days: i64,
    /// Janitor cadence; spec says "daily".
    pub cleanup_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            processing_interval: Duration::from_millis(5000),
            retry_interval: Duration::from_millis(10000),
            max_retries: 5,
            cleanup_after_days: 7,
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl DispatcherConfig {
    /// `outbox.*` configuration surface (spec.md §6); every knob here is
    /// an optional tunable, so a missing or unparseable value falls back
    /// to the documented default rather than failing startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse("OUTBOX_BATCH_SIZE", defaults.batch_size),
            processing_interval: Duration::from_millis(env_parse(
                "OUTBOX_PROCESSING_INTERVAL_MS",
                defaults.processing_interval.as_millis() as u64,
            )),
            retry_interval: Duration::from_millis(env_parse(
                "OUTBOX_RETRY_INTERVAL_MS",
                defaults.retry_interval.as_millis() as u64,
            )),
            max_retries: env_parse("OUTBOX_MAX_RETRIES", defaults.max_retries),
            cleanup_after_days: env_parse("OUTBOX_CLEANUP_AFTER_DAYS", defaults.cleanup_after_days),
            cleanup_interval: defaults.cleanup_interval,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Drives the two scheduled drains (fresh, retry) and the GC janitor. Each
/// loop is independently cancellable via the shared `CancellationToken`,
/// following the lifecycle pattern the rest of the substrate uses for
/// graceful shutdown.
pub struct OutboxDispatcher<S: OutboxStore, P: OutboxPublisher> {
    store: Arc<S>,
    publisher: Arc<P>,
    config: DispatcherConfig,
    metrics: Option<OutboxMetrics>,
    circuit_breaker: CircuitBreaker,
    cancel: CancellationToken,
}

impl<S: OutboxStore + 'static, P: OutboxPublisher + 'static> OutboxDispatcher<S, P> {
    pub fn new(store: Arc<S>, publisher: Arc<P>, config: DispatcherConfig) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics: None,
            circuit_breaker: CircuitBreaker::new(kafka_config().circuit_breaker),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawns the fresh drain, retry drain, and janitor as independent
    /// background tasks. Returns their handles so the caller's lifecycle
    /// supervisor can await them after calling `shutdown()`.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let fresh = Arc::clone(self);
        let retry = Arc::clone(self);
        let janitor = Arc::clone(self);

        vec![
            tokio::spawn(async move { fresh.fresh_drain_loop().await }),
            tokio::spawn(async move { retry.retry_drain_loop().await }),
            tokio::spawn(async move { janitor.janitor_loop().await }),
        ]
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn fresh_drain_loop(self: Arc<Self>) {
        info!(interval_ms = self.config.processing_interval.as_millis(), "fresh drain started");
        loop {
            match self.drain_fresh().await {
                Ok(count) if count > 0 => info!(published = count, "fresh drain cycle complete"),
                Ok(_) => debug!("fresh drain cycle: nothing to publish"),
                Err(e) => error!(error = ?e, "fresh drain cycle failed"),
            }
            self.report_metrics().await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.processing_interval) => {}
            }
        }
        info!("fresh drain stopped");
    }

    async fn retry_drain_loop(self: Arc<Self>) {
        info!(interval_ms = self.config.retry_interval.as_millis(), "retry drain started");
        loop {
            match self.drain_retry().await {
                Ok(count) if count > 0 => info!(published = count, "retry drain cycle complete"),
                Ok(_) => debug!("retry drain cycle: nothing to publish"),
                Err(e) => error!(error = ?e, "retry drain cycle failed"),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_interval) => {}
            }
        }
        info!("retry drain stopped");
    }

    async fn janitor_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.cleanup_interval) => {}
            }
            let cutoff = Utc::now() - ChronoDuration::days(self.config.cleanup_after_days);
            match self.store.delete_processed_older_than(cutoff).await {
                Ok(deleted) => info!(deleted, cutoff = %cutoff, "outbox janitor cleanup complete"),
                Err(e) => error!(error = ?e, "outbox janitor cleanup failed"),
            }
        }
        info!("outbox janitor stopped");
    }

    async fn drain_fresh(&self) -> anyhow::Result<u32> {
        let events = self.store.find_fresh(self.config.batch_size).await?;
        let mut published = 0;
        for event in events {
            if self.publish_one(event).await {
                published += 1;
            }
        }
        Ok(published)
    }

    async fn drain_retry(&self) -> anyhow::Result<u32> {
        let events = self
            .store
            .find_for_retry(Utc::now(), self.config.max_retries, self.config.batch_size)
            .await?;
        let mut published = 0;
        for event in events {
            if self.publish_one(event).await {
                published += 1;
            }
        }
        Ok(published)
    }

    /// Publish a single row. On success, `markProcessed` in its own
    /// transaction-free update; on failure, `incrementRetry` with delay
    /// `2^(retryCount+1)` minutes, dead-lettering once `max_retries` is hit.
    async fn publish_one(&self, event: OutboxEvent) -> bool {
        let publish_result = self
            .circuit_breaker
            .call(|| self.publisher.publish(&event))
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()));

        match publish_result {
            Ok(()) => match self.store.mark_processed(event.id, event.version, Utc::now()).await {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.published.inc();
                    }
                    true
                }
                Err(e) => {
                    error!(event_id = %event.id, error = ?e, "event delivered but mark_processed failed, may redeliver");
                    false
                }
            },
            Err(e) => {
                let next_retry_count = event.retry_count + 1;
                let next_retry_at = next_retry_delay(next_retry_count);
                if next_retry_count >= self.config.max_retries {
                    error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        retry_count = next_retry_count,
                        "event dead-lettered after exceeding max retries, operator intervention required"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.dead_lettered.inc();
                    }
                } else {
                    warn!(event_id = %event.id, retry_count = next_retry_count, error = %e, "event publish failed, retry scheduled");
                    if let Some(metrics) = &self.metrics {
                        metrics.retried.inc();
                    }
                }
                if let Err(store_err) = self
                    .store
                    .increment_retry(event.id, event.version, next_retry_at, &e.to_string())
                    .await
                {
                    error!(event_id = %event.id, error = ?store_err, "failed to record publish failure");
                }
                false
            }
        }
    }

    async fn report_metrics(&self) {
        if let Some(metrics) = &self.metrics {
            if let Ok((pending, age)) = self.store.pending_stats().await {
                metrics.pending.set(pending);
                metrics.oldest_pending_age_seconds.set(age);
            }
        }
    }
}

/// `2^(retryCount+1)` minutes from now, matching the dispatcher's backoff
/// contract (distinct from the consumer worker's per-message backoff).
fn next_retry_delay(retry_count: i32) -> DateTime<Utc> {
    let minutes = 2i64.saturating_pow((retry_count + 1) as u32);
    Utc::now() + ChronoDuration::minutes(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OutboxResult;
    use crate::publisher::OutboxPublisher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let base = Utc::now();
        let first = next_retry_delay(0) - base;
        let second = next_retry_delay(1) - base;
        assert!(first.num_minutes() >= 1 && first.num_minutes() <= 2);
        assert!(second.num_minutes() >= 3 && second.num_minutes() <= 4);
    }

    /// In-memory stand-in for `SqlxOutboxStore`, tracking events the same
    /// way the real table's `processed`/`retry_count` columns would.
    #[derive(Default)]
    struct FakeStore {
        events: Mutex<Vec<OutboxEvent>>,
    }

    impl FakeStore {
        fn seed(events: Vec<OutboxEvent>) -> Self {
            Self {
                events: Mutex::new(events),
            }
        }
    }

    #[async_trait]
    impl OutboxStore for FakeStore {
        async fn insert(&self, _tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, event: &OutboxEvent) -> OutboxResult<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn find_fresh(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| !e.processed && e.retry_count == 0)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn find_for_retry(&self, now: DateTime<Utc>, max_retries: i32, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| {
                    !e.processed
                        && e.retry_count > 0
                        && e.retry_count < max_retries
                        && e.next_retry_at.map(|t| t <= now).unwrap_or(true)
                })
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn mark_processed(&self, id: Uuid, _version: i32, ts: DateTime<Utc>) -> OutboxResult<()> {
            let mut events = self.events.lock().unwrap();
            let event = events.iter_mut().find(|e| e.id == id).expect("event exists");
            event.processed = true;
            event.processed_at = Some(ts);
            Ok(())
        }

        async fn increment_retry(
            &self,
            id: Uuid,
            _version: i32,
            next_retry_at: DateTime<Utc>,
            err: &str,
        ) -> OutboxResult<()> {
            let mut events = self.events.lock().unwrap();
            let event = events.iter_mut().find(|e| e.id == id).expect("event exists");
            event.retry_count += 1;
            event.next_retry_at = Some(next_retry_at);
            event.error_message = Some(err.to_string());
            Ok(())
        }

        async fn delete_processed_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64> {
            let mut events = self.events.lock().unwrap();
            let before = events.len();
            events.retain(|e| !(e.processed && e.processed_at.map(|t| t < cutoff).unwrap_or(false)));
            Ok((before - events.len()) as u64)
        }

        async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
            let events = self.events.lock().unwrap();
            let pending = events.iter().filter(|e| !e.processed).count() as i64;
            Ok((pending, 0))
        }
    }

    /// Publisher whose success can be toggled mid-test, to drive both the
    /// happy path and the retry/dead-letter path without a real broker.
    #[derive(Default)]
    struct FlakyPublisher {
        should_fail: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OutboxPublisher for FlakyPublisher {
        async fn publish(&self, _event: &OutboxEvent) -> OutboxResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(crate::error::OutboxError::PublishFailed("simulated outage".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn dispatcher_with(store: FakeStore, publisher: FlakyPublisher) -> OutboxDispatcher<FakeStore, FlakyPublisher> {
        OutboxDispatcher::new(Arc::new(store), Arc::new(publisher), DispatcherConfig::default())
    }

    #[tokio::test]
    async fn happy_path_marks_event_processed_on_first_attempt() {
        let event = OutboxEvent::new(Uuid::new_v4(), "product", "ProductCreated", serde_json::json!({"id": 1}));
        let id = event.id;
        let store = FakeStore::seed(vec![event]);
        let dispatcher = dispatcher_with(store, FlakyPublisher::default());

        let published = dispatcher.drain_fresh().await.unwrap();
        assert_eq!(published, 1);

        let events = dispatcher.store.events.lock().unwrap();
        let row = events.iter().find(|e| e.id == id).unwrap();
        assert!(row.processed);
        assert_eq!(row.retry_count, 0);
    }

    #[tokio::test]
    async fn failed_publish_increments_retry_and_leaves_event_out_of_fresh_drain() {
        let event = OutboxEvent::new(Uuid::new_v4(), "product", "ProductCreated", serde_json::json!({"id": 1}));
        let id = event.id;
        let store = FakeStore::seed(vec![event]);
        let publisher = FlakyPublisher::default();
        publisher.should_fail.store(true, Ordering::SeqCst);
        let dispatcher = dispatcher_with(store, publisher);

        let published = dispatcher.drain_fresh().await.unwrap();
        assert_eq!(published, 0);

        {
            let events = dispatcher.store.events.lock().unwrap();
            let row = events.iter().find(|e| e.id == id).unwrap();
            assert!(!row.processed);
            assert_eq!(row.retry_count, 1);
        }

        // The row no longer qualifies as fresh (retry_count > 0) and its
        // next_retry_at is in the future, so neither drain should touch it
        // again until the backoff elapses.
        assert_eq!(dispatcher.drain_fresh().await.unwrap(), 0);
        assert_eq!(dispatcher.drain_retry().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fresh_and_retry_drains_operate_on_disjoint_rows() {
        let fresh_event = OutboxEvent::new(Uuid::new_v4(), "product", "ProductCreated", serde_json::json!({"id": 1}));
        let mut retry_event = OutboxEvent::new(Uuid::new_v4(), "product", "ProductUpdated", serde_json::json!({"id": 2}));
        retry_event.retry_count = 1;
        retry_event.next_retry_at = Some(Utc::now() - ChronoDuration::minutes(1));

        let store = FakeStore::seed(vec![fresh_event, retry_event]);
        let dispatcher = dispatcher_with(store, FlakyPublisher::default());

        // A retry-drain cycle must not pick up the still-fresh row, and a
        // fresh-drain cycle must not pick up the already-retrying row.
        assert_eq!(dispatcher.drain_retry().await.unwrap(), 1);
        assert_eq!(dispatcher.drain_fresh().await.unwrap(), 1);

        let events = dispatcher.store.events.lock().unwrap();
        assert!(events.iter().all(|e| e.processed));
    }

    #[tokio::test]
    async fn event_is_dead_lettered_after_max_retries() {
        let mut event = OutboxEvent::new(Uuid::new_v4(), "product", "ProductCreated", serde_json::json!({"id": 1}));
        event.retry_count = 4;
        event.next_retry_at = Some(Utc::now() - ChronoDuration::minutes(1));
        let id = event.id;

        let store = FakeStore::seed(vec![event]);
        let publisher = FlakyPublisher::default();
        publisher.should_fail.store(true, Ordering::SeqCst);
        let mut config = DispatcherConfig::default();
        config.max_retries = 5;
        let dispatcher = OutboxDispatcher::new(Arc::new(store), Arc::new(publisher), config);

        let published = dispatcher.drain_retry().await.unwrap();
        assert_eq!(published, 0);

        let events = dispatcher.store.events.lock().unwrap();
        let row = events.iter().find(|e| e.id == id).unwrap();
        assert!(!row.processed);
        assert_eq!(row.retry_count, 5);
    }
}
