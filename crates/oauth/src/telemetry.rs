//! Metrics emitted by the flows and filters
//!
//! - `oauth_handshakes_total` (counter): labels `flow`, `outcome`
//! - `oauth_token_refresh_total` (counter): label `outcome`
//! - `oauth_token_refresh_duration_seconds` (histogram)
//! - `oauth_requests_queued_total` (counter)
//! - `oauth_requests_signed_total` (counter): label `scheme`
//!
//! Without an installed recorder every call is a no-op.

use crate::error::AuthError;

pub const REFRESH_DURATION_METRIC: &str = "oauth_token_refresh_duration_seconds";

fn outcome<T>(result: &Result<T, AuthError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.kind.label(),
    }
}

/// Record the end of a login/authorize handshake.
pub fn record_handshake<T>(flow: &'static str, result: &Result<T, AuthError>) {
    metrics::counter!("oauth_handshakes_total", "flow" => flow, "outcome" => outcome(result))
        .increment(1);
}

/// Record a completed token refresh.
pub fn record_refresh<T>(result: &Result<T, AuthError>, duration_secs: f64) {
    metrics::counter!("oauth_token_refresh_total", "outcome" => outcome(result)).increment(1);
    metrics::histogram!(REFRESH_DURATION_METRIC).record(duration_secs);
}

/// A request was held back waiting for a token refresh.
pub fn record_queued() {
    metrics::counter!("oauth_requests_queued_total").increment(1);
}

/// A request left a filter carrying credentials.
pub fn record_signed(scheme: &'static str) {
    metrics::counter!("oauth_requests_signed_total", "scheme" => scheme).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn calls_are_noops_without_recorder() {
        record_handshake::<()>("oauth2", &Ok(()));
        record_queued();
        record_signed("bearer");
    }

    #[test]
    fn handshake_outcome_uses_error_kind_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_handshake::<()>("oauth1", &Ok(()));
        record_handshake::<()>("oauth2", &Err(AuthError::protocol("missing code")));

        let output = handle.render();
        assert!(output.contains("oauth_handshakes_total"));
        assert!(output.contains("flow=\"oauth1\""));
        assert!(output.contains("outcome=\"success\""));
        assert!(output.contains("outcome=\"protocol_error\""));
    }

    #[test]
    fn refresh_and_queue_counters_render() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_refresh::<()>(&Err(AuthError::server("invalid_grant")), 0.2);
        record_queued();
        record_queued();
        record_signed("oauth1");

        let output = handle.render();
        assert!(output.contains("oauth_token_refresh_total{outcome=\"server_error\"} 1"));
        assert!(output.contains("oauth_requests_queued_total 2"));
        assert!(output.contains("oauth_requests_signed_total{scheme=\"oauth1\"} 1"));
        assert!(output.contains(REFRESH_DURATION_METRIC));
    }
}
