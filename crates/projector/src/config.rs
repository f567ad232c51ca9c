use std::env;
use std::time::Duration;

/// `elasticsearch.sync.*` configuration surface (§6), read from environment
/// variables the way the rest of the substrate's components do.
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub elasticsearch_url: String,
    pub index_name: String,
    /// `elasticsearch.sync.consumer-workers`, default 2.
    pub worker_count: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Retention for the idempotency guard's processed-event ledger.
    pub idempotency_retention: Duration,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            elasticsearch_url: "http://localhost:9200".to_string(),
            index_name: "products".to_string(),
            worker_count: 2,
            batch_size: 10,
            poll_interval: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            idempotency_retention: Duration::from_secs(7 * 86400),
        }
    }
}

impl ProjectorConfig {
    /// `ELASTICSEARCH_URL` is a required connection string and fails fast
    /// (`ConfigurationError`, spec.md §7) rather than silently defaulting;
    /// every other knob falls back to the documented default on parse
    /// failure or absence.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let elasticsearch_url =
            env::var("ELASTICSEARCH_URL").map_err(|_| "ELASTICSEARCH_URL environment variable not set".to_string())?;

        Ok(Self {
            elasticsearch_url,
            index_name: env::var("ELASTICSEARCH_PRODUCT_INDEX").unwrap_or(defaults.index_name),
            worker_count: env_parse("ELASTICSEARCH_SYNC_CONSUMER_WORKERS", defaults.worker_count),
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
            idempotency_retention: defaults.idempotency_retention,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
