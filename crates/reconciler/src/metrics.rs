use prometheus::{IntCounter, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct ReconcilerMetrics {
    pub full_syncs_total: IntCounter,
    pub incremental_syncs_total: IntCounter,
    pub documents_reconciled_total: IntCounter,
    pub sync_errors_total: IntCounter,
}

impl ReconcilerMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let full_syncs_total = IntCounter::with_opts(
            Opts::new("reconciler_full_syncs_total", "Total full reconciliation passes run")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for reconciler_full_syncs_total");

        let incremental_syncs_total = IntCounter::with_opts(
            Opts::new("reconciler_incremental_syncs_total", "Total incremental reconciliation cycles run")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for reconciler_incremental_syncs_total");

        let documents_reconciled_total = IntCounter::with_opts(
            Opts::new("reconciler_documents_reconciled_total", "Total documents upserted by the reconciler")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for reconciler_documents_reconciled_total");

        let sync_errors_total = IntCounter::with_opts(
            Opts::new("reconciler_sync_errors_total", "Total reconciliation cycles that failed")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for reconciler_sync_errors_total");

        for metric in [
            Box::new(full_syncs_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(incremental_syncs_total.clone()),
            Box::new(documents_reconciled_total.clone()),
            Box::new(sync_errors_total.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register reconciler metric: {}", e);
            }
        }

        Self {
            full_syncs_total,
            incremental_syncs_total,
            documents_reconciled_total,
            sync_errors_total,
        }
    }
}
