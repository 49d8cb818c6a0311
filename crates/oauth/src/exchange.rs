//! Bounded request/reply exchange with credential endpoints

use std::time::Duration;

use tracing::debug;
use transport::{HttpBackend, HttpReply, HttpRequest};

use crate::error::{AuthError, Result};

/// Send `request` on `backend`, failing with a system error after `timeout`.
pub(crate) async fn send_bounded(
    backend: &dyn HttpBackend,
    request: HttpRequest,
    timeout: Duration,
) -> Result<HttpReply> {
    let uri = request.uri.clone();
    let reply = tokio::time::timeout(timeout, backend.send(request))
        .await
        .map_err(|_| AuthError::system(format!("{uri}: no reply within {timeout:?}")))??;
    debug!(uri, status = reply.status, "credential endpoint replied");
    Ok(reply)
}

/// Body of a 200 reply with a non-empty body; anything else is a protocol error.
pub(crate) fn expect_body(reply: HttpReply, endpoint: &str) -> Result<String> {
    if reply.status != 200 {
        return Err(AuthError::protocol(format!(
            "{endpoint} returned status {}",
            reply.status
        )));
    }
    if reply.body.trim().is_empty() {
        return Err(AuthError::protocol(format!("{endpoint} returned an empty body")));
    }
    Ok(reply.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::ScriptedBackend;

    #[test]
    fn non_200_and_empty_bodies_are_protocol_errors() {
        let err = expect_body(HttpReply::new(401, "denied"), "token endpoint").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert!(err.detail.contains("401"));

        let err = expect_body(HttpReply::new(200, "  "), "token endpoint").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);

        assert_eq!(
            expect_body(HttpReply::new(200, "a=b"), "token endpoint").unwrap(),
            "a=b"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_endpoint_times_out_as_system_error() {
        let backend = ScriptedBackend::new();
        backend.push_delayed(Duration::from_secs(60), HttpReply::new(200, "late"));

        let err = send_bounded(
            &backend,
            HttpRequest::post("https://provider.test/token"),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::System);
    }
}
