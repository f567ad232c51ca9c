use crate::error::{ConsumerError, ConsumerResult};
use crate::worker::{ConsumerWorker, Handler, WorkerConfig, WorkerStats};
use dashmap::DashMap;
use message_bus::Broker;
use std::sync::Arc;
use tracing::info;

struct Group {
    workers: Vec<Arc<ConsumerWorker>>,
}

/// Constructs `workerCount` workers per logical group, each with a distinct
/// worker identity so each owns its own committed-offset cursor. This is
/// the fan-out primitive: simpler than true partition rebalancing, and
/// sufficient because per-worker identities are stable for the group's
/// lifetime.
pub struct ConsumerGroupFactory {
    broker: Arc<Broker>,
    groups: DashMap<String, Group>,
}

impl ConsumerGroupFactory {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            groups: DashMap::new(),
        }
    }

    fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    pub fn create_group(
        &self,
        group_id: impl Into<String>,
        topics: Vec<String>,
        worker_count: usize,
        handler_factory: impl Fn() -> Handler,
        config: WorkerConfig,
    ) -> ConsumerResult<()> {
        let group_id = group_id.into();
        if self.groups.contains_key(&group_id) {
            return Err(ConsumerError::GroupAlreadyExists(group_id));
        }
        let broker = self.broker();
        let workers = (0..worker_count)
            .map(|i| {
                Arc::new(ConsumerWorker::new(
                    group_id.clone(),
                    i,
                    topics.clone(),
                    Arc::clone(&broker),
                    handler_factory(),
                    config.clone(),
                ))
            })
            .collect();
        info!(group_id = %group_id, worker_count, topics = ?topics, "consumer group created");
        self.groups.insert(group_id, Group { workers });
        Ok(())
    }

    pub async fn start(&self, group_id: &str) -> ConsumerResult<()> {
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| ConsumerError::UnknownGroup(group_id.to_string()))?;
        for worker in &group.workers {
            worker.start().await;
        }
        Ok(())
    }

    pub async fn stop(&self, group_id: &str) -> ConsumerResult<()> {
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| ConsumerError::UnknownGroup(group_id.to_string()))?;
        for worker in &group.workers {
            worker.stop().await;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let group_ids: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        for group_id in group_ids {
            let _ = self.stop(&group_id).await;
        }
    }

    pub async fn stats(&self, group_id: &str) -> ConsumerResult<Vec<WorkerStats>> {
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| ConsumerError::UnknownGroup(group_id.to_string()))?;
        let mut stats = Vec::with_capacity(group.workers.len());
        for worker in &group.workers {
            stats.push(worker.stats().await);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{BatchHandler, MessageHandler};
    use async_trait::async_trait;
    use message_bus::{Message, MessageBatch};

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(&self, _message: &Message) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[allow(dead_code)]
    struct NoopBatchHandler;

    #[async_trait]
    impl BatchHandler for NoopBatchHandler {
        async fn handle(&self, batch: &MessageBatch) -> Vec<anyhow::Result<()>> {
            batch.messages.iter().map(|_| Ok(())).collect()
        }
    }

    #[tokio::test]
    async fn create_group_is_rejected_on_duplicate_id() {
        let broker = Arc::new(Broker::new());
        let factory = ConsumerGroupFactory::new(broker);
        factory
            .create_group(
                "search-indexer",
                vec!["product-events".to_string()],
                2,
                || Handler::Message(Arc::new(NoopHandler)),
                WorkerConfig::default(),
            )
            .unwrap();

        let result = factory.create_group(
            "search-indexer",
            vec!["product-events".to_string()],
            2,
            || Handler::Message(Arc::new(NoopHandler)),
            WorkerConfig::default(),
        );
        assert!(matches!(result, Err(ConsumerError::GroupAlreadyExists(_))));
    }

    #[tokio::test]
    async fn start_stop_is_idempotent_per_group() {
        let broker = Arc::new(Broker::new());
        let factory = ConsumerGroupFactory::new(broker);
        factory
            .create_group(
                "search-indexer",
                vec!["product-events".to_string()],
                3,
                || Handler::Message(Arc::new(NoopHandler)),
                WorkerConfig::default(),
            )
            .unwrap();

        factory.start("search-indexer").await.unwrap();
        factory.start("search-indexer").await.unwrap();
        let stats = factory.stats("search-indexer").await.unwrap();
        assert_eq!(stats.len(), 3);
        factory.stop("search-indexer").await.unwrap();
    }
}
