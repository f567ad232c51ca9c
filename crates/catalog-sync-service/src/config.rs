/// Aggregates one sub-config struct per component (spec.md §6); each knows
/// its own `from_env()`. Required connection strings fail fast here by
/// propagating the underlying component's `Err`; every other knob is an
/// optional tunable that falls back to its documented default.
pub struct CatalogSyncConfig {
    pub service_name: String,
    pub db: db_pool::DbConfig,
    pub dispatcher: outbox::DispatcherConfig,
    pub worker: consumer_runtime::WorkerConfig,
    pub projector: projector::ProjectorConfig,
    pub reconciler: reconciler::ReconcilerConfig,
}

impl CatalogSyncConfig {
    pub fn from_env() -> Result<Self, String> {
        let service_name = "catalog-sync-service".to_string();
        Ok(Self {
            db: db_pool::DbConfig::from_env(&service_name)?,
            dispatcher: outbox::DispatcherConfig::from_env(),
            worker: consumer_runtime::WorkerConfig::from_env(),
            projector: projector::ProjectorConfig::from_env()?,
            reconciler: reconciler::ReconcilerConfig::from_env(),
            service_name,
        })
    }
}
