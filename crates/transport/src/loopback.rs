//! One-shot loopback listener for OAuth redirect callbacks
//!
//! Binds `127.0.0.1` on an OS-assigned port and serves a single path. Each
//! request to that path is handed to the owner as a `CallbackRequest`; the
//! browser is held until the owner answers with an HTML page. Dropping the
//! listener stops the server after in-flight responses are written.

use std::net::Ipv4Addr;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::{Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::any;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// A redirect callback received by the loopback listener.
#[derive(Debug)]
pub struct CallbackRequest {
    pub method: Method,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    reply: oneshot::Sender<String>,
}

impl CallbackRequest {
    /// Answer the browser with an HTML page.
    pub fn respond(self, html: impl Into<String>) {
        if self.reply.send(html.into()).is_err() {
            debug!("browser disconnected before callback page was sent");
        }
    }
}

/// Loopback HTTP listener serving one callback path.
#[derive(Debug)]
pub struct LoopbackListener {
    port: u16,
    path: String,
    requests: mpsc::Receiver<CallbackRequest>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LoopbackListener {
    /// Bind on `127.0.0.1:0` and start serving `path`.
    pub async fn bind(path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(Error::Listener(format!(
                "callback path must start with '/', got: {path}"
            )));
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| Error::Listener(format!("binding 127.0.0.1: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Listener(format!("reading bound address: {e}")))?
            .port();

        let (tx, requests) = mpsc::channel(4);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = Router::new()
            .route(path, any(handle_callback))
            .with_state(tx);

        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            match served {
                Ok(()) => debug!(port, "loopback listener stopped"),
                Err(e) => warn!(port, error = %e, "loopback listener failed"),
            }
        });

        info!(port, path, "loopback listener bound");
        Ok(Self {
            port,
            path: path.to_string(),
            requests,
            shutdown: Some(shutdown),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// URL the provider should redirect the browser to.
    pub fn callback_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, self.path)
    }

    /// Wait for the next callback. `None` once the server has gone away.
    pub async fn next_request(&mut self) -> Option<CallbackRequest> {
        self.requests.recv().await
    }

    /// Stop accepting connections. Idempotent.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            debug!(port = self.port, "loopback listener stopping");
        }
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_callback(
    State(tx): State<mpsc::Sender<CallbackRequest>>,
    method: Method,
    RawQuery(query): RawQuery,
) -> Response {
    let (reply, page) = oneshot::channel();
    let request = CallbackRequest {
        method,
        query,
        reply,
    };
    if tx.send(request).await.is_err() {
        return (StatusCode::GONE, "authorization is no longer in progress").into_response();
    }
    match page.await {
        Ok(html) => Html(html).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "authorization was cancelled",
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn callback_round_trip() {
        let mut listener = LoopbackListener::bind("/oauth2").await.unwrap();
        let url = format!("{}?code=abc123", listener.callback_url());
        assert!(url.starts_with("http://127.0.0.1:"));

        let browser = tokio::spawn(async move {
            let response = reqwest::get(url).await.unwrap();
            (response.status().as_u16(), response.text().await.unwrap())
        });

        let request = listener.next_request().await.unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query.as_deref(), Some("code=abc123"));
        request.respond("<h1>Authorization OK</h1>");

        let (status, body) = browser.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "<h1>Authorization OK</h1>");
    }

    #[tokio::test]
    async fn other_paths_are_not_forwarded() {
        let listener = LoopbackListener::bind("/oauth-verified").await.unwrap();
        let url = format!("http://127.0.0.1:{}/favicon.ico", listener.port());

        let response = reqwest::get(url).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn dropped_request_answers_unavailable() {
        let mut listener = LoopbackListener::bind("/oauth2").await.unwrap();
        let url = listener.callback_url();

        let browser = tokio::spawn(async move { reqwest::get(url).await.unwrap().status().as_u16() });

        let request = listener.next_request().await.unwrap();
        drop(request);

        assert_eq!(browser.await.unwrap(), 503);
    }

    #[tokio::test]
    async fn rejects_relative_path() {
        let result = LoopbackListener::bind("oauth2").await;
        assert!(matches!(result, Err(Error::Listener(_))));
    }
}
