use prometheus::{IntCounter, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct ProjectorMetrics {
    pub documents_upserted: IntCounter,
    pub documents_deleted: IntCounter,
    pub counters_incremented: IntCounter,
    pub duplicates_skipped: IntCounter,
}

impl ProjectorMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let documents_upserted = IntCounter::with_opts(
            Opts::new("projector_documents_upserted_total", "Total product documents created or updated")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for projector_documents_upserted_total");

        let documents_deleted = IntCounter::with_opts(
            Opts::new("projector_documents_deleted_total", "Total product documents deleted")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for projector_documents_deleted_total");

        let counters_incremented = IntCounter::with_opts(
            Opts::new(
                "projector_counters_incremented_total",
                "Total atomic counter increments applied (clicks, purchases, inventory)",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for projector_counters_incremented_total");

        let duplicates_skipped = IntCounter::with_opts(
            Opts::new("projector_duplicates_skipped_total", "Events skipped by the idempotency guard")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for projector_duplicates_skipped_total");

        for metric in [
            Box::new(documents_upserted.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(documents_deleted.clone()),
            Box::new(counters_incremented.clone()),
            Box::new(duplicates_skipped.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register projector metric: {}", e);
            }
        }

        Self {
            documents_upserted,
            documents_deleted,
            counters_incremented,
            duplicates_skipped,
        }
    }
}
