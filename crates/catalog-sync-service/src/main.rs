use catalog_sync_service::{CatalogSyncConfig, Supervisor};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,catalog_sync_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting catalog-sync-service");

    let config = CatalogSyncConfig::from_env().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    let supervisor = Supervisor::start(config).await?;
    supervisor.run_until_signal().await
}
