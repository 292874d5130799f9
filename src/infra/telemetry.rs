use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CACHE_BLANK_HIT, METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_WRITE_FAILURE,
    METRIC_SEED, METRIC_SEED_MS, METRIC_SEED_ROWS, METRIC_STALE_PAGINATION,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of point-cache hits."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of point-cache misses (expired or never cached)."
        );
        describe_counter!(
            METRIC_CACHE_BLANK_HIT,
            Unit::Count,
            "Total number of reads answered by a blank marker."
        );
        describe_counter!(
            METRIC_STALE_PAGINATION,
            Unit::Count,
            "Total number of timeline fetches rejected for a stale cursor."
        );
        describe_counter!(
            METRIC_CACHE_WRITE_FAILURE,
            Unit::Count,
            "Total number of cache updates that failed after a relational commit."
        );
        describe_counter!(
            METRIC_SEED,
            Unit::Count,
            "Total number of seed runs per structure."
        );
        describe_counter!(
            METRIC_SEED_ROWS,
            Unit::Count,
            "Total number of rows loaded into the cache by seeders."
        );
        describe_histogram!(
            METRIC_SEED_MS,
            Unit::Milliseconds,
            "Seed latency in milliseconds, query and cache commit included."
        );
    });
}
