//! Prometheus metrics exposition
//!
//! The oauth crate emits its counters through the `metrics` facade; this
//! module installs the recorder that collects them.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use oauth::telemetry::REFRESH_DURATION_METRIC;

/// Refresh round trips: a provider answering in 10ms up to one hitting the
/// default 30s request timeout.
const REFRESH_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(REFRESH_DURATION_METRIC.to_string()),
        REFRESH_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for rendering.
///
/// `oauth_token_refresh_duration_seconds` gets explicit buckets so it renders
/// as a histogram with `_bucket` lines rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}
