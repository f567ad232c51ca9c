use std::env;
use std::time::Duration;

/// `elasticsearch.sync.*` configuration surface (§6) shared with the
/// projector's consumer-workers knob.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// `elasticsearch.sync.batch-size`, default 100 — page size for `fullSync`.
    pub batch_size: i64,
    /// `elasticsearch.sync.incremental-interval-ms`, default 300000 (5 min).
    pub incremental_interval: Duration,
    /// Lookback window for `incrementalSync`'s "updated in the last hour" selection.
    pub incremental_window: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            incremental_interval: Duration::from_millis(300_000),
            incremental_window: Duration::from_secs(3600),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse("ELASTICSEARCH_SYNC_BATCH_SIZE", defaults.batch_size),
            incremental_interval: Duration::from_millis(env_parse(
                "ELASTICSEARCH_SYNC_INCREMENTAL_INTERVAL_MS",
                defaults.incremental_interval.as_millis() as u64,
            )),
            incremental_window: Duration::from_secs(env_parse(
                "ELASTICSEARCH_SYNC_INCREMENTAL_WINDOW_SECS",
                defaults.incremental_window.as_secs(),
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
