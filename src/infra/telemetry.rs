use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_CACHE_BYPASS, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATED_KEYS,
    METRIC_CACHE_INVALIDATION_MS, METRIC_CACHE_MISS, METRIC_CACHE_POPULATE_SKIPPED,
    METRIC_CACHE_UNAVAILABLE,
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Cached reads served from the cache store."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Cached reads that fell through to the store of record."
        );
        describe_counter!(
            METRIC_CACHE_BYPASS,
            Unit::Count,
            "Reads of never-cached families."
        );
        describe_counter!(
            METRIC_CACHE_UNAVAILABLE,
            Unit::Count,
            "Cache store calls that failed because the store was unreachable."
        );
        describe_counter!(
            METRIC_CACHE_POPULATE_SKIPPED,
            Unit::Count,
            "Computed values not cached because they were absent."
        );
        describe_counter!(
            METRIC_CACHE_INVALIDATED_KEYS,
            Unit::Count,
            "Keys deleted by post-commit invalidation."
        );
        describe_histogram!(
            METRIC_CACHE_INVALIDATION_MS,
            Unit::Milliseconds,
            "Invalidation plan execution latency in milliseconds."
        );
    });
}
