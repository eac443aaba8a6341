use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
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

/// Register descriptions for every metric the worker emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "offline_worker_cache_hit_total",
            Unit::Count,
            "Requests answered from the current cache generation."
        );
        describe_counter!(
            "offline_worker_cache_miss_total",
            Unit::Count,
            "Cache probes that found no entry under any candidate key."
        );
        describe_counter!(
            "offline_worker_cache_write_failure_total",
            Unit::Count,
            "Responses served without being cached because the write failed."
        );
        describe_counter!(
            "offline_worker_network_failure_total",
            Unit::Count,
            "Upstream requests that failed at the transport level."
        );
        describe_counter!(
            "offline_worker_fallback_total",
            Unit::Count,
            "Synthesized 503 responses served when network and cache both failed."
        );
        describe_counter!(
            "offline_worker_prefetch_item_total",
            Unit::Count,
            "Prefetched resources, labelled by outcome."
        );
        describe_histogram!(
            "offline_worker_prefetch_ms",
            Unit::Milliseconds,
            "Prefetch job latency in milliseconds."
        );
        describe_counter!(
            "offline_worker_evicted_generation_total",
            Unit::Count,
            "Stale cache generations deleted during activation."
        );
    });
}
