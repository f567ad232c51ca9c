//! Lifecycle supervisor (C14): starts components in the order broker →
//! outbox dispatcher → consumer groups → reconciler, and tears them down in
//! the reverse order so nothing downstream is stopped while something
//! upstream of it might still enqueue work it depends on.

use crate::config::CatalogSyncConfig;
use anyhow::Context;
use consumer_runtime::{ConsumerGroupFactory, Handler};
use db_pool::create_pool;
use idempotent_consumer::IdempotencyGuard;
use message_bus::{Broker, Publisher};
use outbox::{BrokerOutboxPublisher, OutboxDispatcher, OutboxMetrics, SqlxOutboxStore};
use projector::{ElasticsearchClient, ProjectorHandler, ProjectorMetrics};
use reconciler::{Reconciler, ReconcilerMetrics, SqlxProductStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

const SEARCH_INDEXER_GROUP: &str = "search-indexer";
const PRODUCT_EVENTS_TOPIC: &str = "product-events";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns every long-lived component and the handles needed to drain them in
/// order on shutdown.
pub struct Supervisor {
    dispatcher: Arc<OutboxDispatcher<SqlxOutboxStore, BrokerOutboxPublisher>>,
    dispatcher_handles: Vec<JoinHandle<()>>,
    consumer_factory: Arc<ConsumerGroupFactory>,
    reconciler: Arc<Reconciler<SqlxProductStore>>,
    reconciler_handle: JoinHandle<()>,
}

impl Supervisor {
    pub async fn start(config: CatalogSyncConfig) -> anyhow::Result<Self> {
        let pool = create_pool(config.db.clone())
            .await
            .context("failed to create database pool")?;
        info!("database pool created");

        // C3: in-process broker shared by the outbox publisher and every
        // consumer worker.
        let broker = Arc::new(Broker::new());

        // C7/C8: outbox store drained by the dispatcher into the broker.
        let outbox_store = Arc::new(SqlxOutboxStore::new(pool.clone()));
        let broker_publisher = Arc::new(Publisher::new(Arc::clone(&broker)));
        let outbox_publisher = Arc::new(BrokerOutboxPublisher::new(broker_publisher));
        let outbox_metrics = OutboxMetrics::new(&config.service_name);
        let dispatcher = Arc::new(
            OutboxDispatcher::new(outbox_store, outbox_publisher, config.dispatcher.clone())
                .with_metrics(outbox_metrics),
        );
        let dispatcher_handles = dispatcher.start();
        info!("outbox dispatcher started");

        // C9: the projector's search index and idempotency guard, shared
        // with the reconciler below (same index, same source of truth).
        let search = Arc::new(
            ElasticsearchClient::new(&config.projector.elasticsearch_url, &config.projector.index_name)
                .await
                .context("failed to initialize Elasticsearch client")?,
        );
        let idempotency = Arc::new(IdempotencyGuard::new(pool.clone(), config.projector.idempotency_retention));
        let projector_metrics = ProjectorMetrics::new(&config.service_name);

        // C6: the search-indexer consumer group running the projector.
        let consumer_factory = Arc::new(ConsumerGroupFactory::new(Arc::clone(&broker)));
        consumer_factory
            .create_group(
                SEARCH_INDEXER_GROUP,
                vec![PRODUCT_EVENTS_TOPIC.to_string()],
                config.projector.worker_count,
                {
                    let search = Arc::clone(&search);
                    let idempotency = Arc::clone(&idempotency);
                    let metrics = projector_metrics.clone();
                    move || {
                        Handler::Batch(Arc::new(
                            ProjectorHandler::new(Arc::clone(&search), Arc::clone(&idempotency))
                                .with_metrics(metrics.clone()),
                        ))
                    }
                },
                config.worker.clone(),
            )
            .context("failed to create search-indexer consumer group")?;
        consumer_factory
            .start(SEARCH_INDEXER_GROUP)
            .await
            .context("failed to start search-indexer workers")?;
        info!("search-indexer consumer group started");

        // C10: reconciler. A cold-start full sync runs before the
        // incremental loop takes over, so a fresh index is never left
        // empty waiting for the first 5-minute tick.
        let product_store = Arc::new(SqlxProductStore::new(pool));
        let reconciler_metrics = ReconcilerMetrics::new(&config.service_name);
        let reconciler = Arc::new(
            Reconciler::new(product_store, Arc::clone(&search), config.reconciler.clone())
                .with_metrics(reconciler_metrics),
        );
        if let Err(e) = reconciler.full_sync().await {
            error!(error = ?e, "cold-start full sync failed, continuing with incremental sync only");
        }
        let reconciler_handle = reconciler.start();
        info!("reconciler started");

        Ok(Self {
            dispatcher,
            dispatcher_handles,
            consumer_factory,
            reconciler,
            reconciler_handle,
        })
    }

    /// Blocks until SIGINT/SIGTERM, then tears everything down.
    pub async fn run_until_signal(self) -> anyhow::Result<()> {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining");
        self.shutdown().await
    }

    /// Reverse of startup order: reconciler, then consumer workers, then
    /// the outbox dispatcher. Each drain is bounded by the 5-second grace
    /// period from spec.md §4.3/§5.
    async fn shutdown(self) -> anyhow::Result<()> {
        self.reconciler.shutdown();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.reconciler_handle).await.is_err() {
            tracing::warn!("reconciler did not stop within the grace period");
        }

        self.consumer_factory.stop_all().await;

        self.dispatcher.shutdown();
        for handle in self.dispatcher_handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("outbox dispatcher task did not stop within the grace period");
            }
        }

        info!("shutdown complete");
        Ok(())
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
