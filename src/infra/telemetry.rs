use std::sync::Once;

use metrics::{describe_counter, describe_histogram, Unit};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
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
            "switchyard_cache_fetch_through_total",
            Unit::Count,
            "Total number of fetch-through calls to the management server, by entity."
        );
        describe_counter!(
            "switchyard_cache_negative_hit_total",
            Unit::Count,
            "Total number of lookups answered from a miss cache, by kind."
        );
        describe_counter!(
            "switchyard_cache_stale_event_total",
            Unit::Count,
            "Total number of change events discarded as stale, by entity."
        );
        describe_counter!(
            "switchyard_cache_mode_switch_total",
            Unit::Count,
            "Total number of orchestrator strategy switches, by target mode."
        );
        describe_counter!(
            "switchyard_event_delivery_failure_total",
            Unit::Count,
            "Total number of event deliveries that failed in a subscriber."
        );
        describe_counter!(
            "switchyard_event_publish_unroutable_total",
            Unit::Count,
            "Total number of published events that had no destination."
        );
        describe_counter!(
            "switchyard_event_publish_failure_total",
            Unit::Count,
            "Total number of publish deliveries that failed in a channel."
        );
        describe_histogram!(
            "switchyard_edge_lookup_ms",
            Unit::Milliseconds,
            "Edge feature lookup latency in milliseconds."
        );
    });
}
