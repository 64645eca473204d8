use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_histogram!(
            "snapcache_notify_ms",
            Unit::Milliseconds,
            "Latency of applying one change batch to a store."
        );
        describe_histogram!(
            "snapcache_load_ms",
            Unit::Milliseconds,
            "Latency of a full tree load from the data source."
        );
        describe_histogram!(
            "snapcache_consume_ms",
            Unit::Milliseconds,
            "Latency of one event consumption batch."
        );
        describe_gauge!(
            "snapcache_live_generation",
            Unit::Count,
            "Live generation of each store."
        );
        describe_counter!(
            "snapcache_collected_total",
            Unit::Count,
            "Chain entries dropped by generation collection."
        );
        describe_counter!(
            "snapcache_notify_failed_total",
            Unit::Count,
            "Changes that could not be applied and need replay."
        );
        describe_gauge!(
            "snapcache_event_queue_len",
            Unit::Count,
            "Current number of pending change events in the queue."
        );
    });
}
