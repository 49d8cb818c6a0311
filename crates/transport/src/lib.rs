//! HTTP transport collaborators for the OAuth client
//!
//! Defines the seams the authentication flows talk through:
//! - `HttpBackend` performs a single request/reply exchange (or streaming GET)
//! - `RequestFilter` stamps outgoing requests; filters are applied in order by
//!   the `Pipeline` inside `HttpClient` before dispatch
//! - `LoopbackListener` receives the browser redirect after authorization
//! - `BrowserLauncher` opens the user's browser at the authorization URL
//!
//! Traits use `Pin<Box<dyn Future>>` return types so they stay dyn-compatible
//! (`Arc<dyn HttpBackend>`, `Arc<dyn RequestFilter>`).

pub mod backend;
pub mod browser;
pub mod client;
pub mod loopback;

pub use backend::ReqwestBackend;
pub use browser::{BrowserLauncher, SystemBrowser};
pub use client::{HttpClient, Pipeline};
pub use loopback::{CallbackRequest, LoopbackListener};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Content type used for OAuth token endpoint bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Errors from transport operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("loopback listener error: {0}")]
    Listener(String),

    #[error("browser launch failed: {0}")]
    Browser(String),

    #[error("request filter error: {0}")]
    Filter(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An outgoing HTTP request as seen by filters and backends.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            content_type: None,
            body: String::new(),
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Attach an `application/x-www-form-urlencoded` body.
    pub fn with_form(mut self, body: impl Into<String>) -> Self {
        self.content_type = Some(FORM_CONTENT_TYPE.to_string());
        self.body = body.into();
        self
    }

    /// Insert or replace a header.
    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A fully buffered HTTP reply.
#[derive(Debug, Clone, Default)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }
}

/// A streaming reply: status is known up front, the body arrives in chunks.
pub struct StreamingReply {
    pub status: u16,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for StreamingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingReply")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Something that can put a request on the wire.
///
/// Implementations should not apply request filters themselves; `HttpClient`
/// runs the pipeline before handing the request over.
pub trait HttpBackend: Send + Sync {
    /// Perform a request/reply exchange.
    fn send(&self, request: HttpRequest)
    -> Pin<Box<dyn Future<Output = Result<HttpReply>> + Send + '_>>;

    /// Perform a request and expose the body as a chunk stream.
    ///
    /// The default buffers the whole reply and yields it as a single chunk.
    fn stream(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StreamingReply>> + Send + '_>> {
        Box::pin(async move {
            let reply = self.send(request).await?;
            let body = Bytes::from(reply.body);
            Ok(StreamingReply {
                status: reply.status,
                chunks: Box::pin(futures_util::stream::once(async move {
                    Ok::<_, Error>(body)
                })),
            })
        })
    }
}

/// A step in the outgoing-request pipeline.
///
/// A filter may hold a request back (e.g. while credentials refresh) before
/// resolving; the pipeline awaits each filter in turn.
pub trait RequestFilter: Send + Sync {
    /// Identifier for logging and pipeline management (e.g. "oauth1", "oauth2")
    fn id(&self) -> &str;

    fn filter(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpRequest>> + Send + '_>>;
}

/// Build a request that carries a form body; shorthand used by token calls.
pub fn form_post(uri: &str, body: String) -> HttpRequest {
    HttpRequest::post(uri).with_form(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use reqwest::header::AUTHORIZATION;

    struct FixedBackend;

    impl HttpBackend for FixedBackend {
        fn send(
            &self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpReply>> + Send + '_>> {
            Box::pin(async { Ok(HttpReply::new(200, "chunked-body")) })
        }
    }

    #[test]
    fn form_request_sets_content_type() {
        let request = form_post("https://example.com/token", "grant_type=refresh_token".into());
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.content_type.as_deref(), Some(FORM_CONTENT_TYPE));
        assert_eq!(request.body, "grant_type=refresh_token");
    }

    #[test]
    fn set_header_rejects_invalid_values() {
        let mut request = HttpRequest::get("https://example.com");
        let result = request.set_header(AUTHORIZATION, "Bearer bad\nvalue");
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
        assert!(request.header(&AUTHORIZATION).is_none());

        request.set_header(AUTHORIZATION, "Bearer ok").unwrap();
        assert_eq!(request.header(&AUTHORIZATION), Some("Bearer ok"));
    }

    #[tokio::test]
    async fn default_stream_yields_buffered_body() {
        let reply = FixedBackend
            .stream(HttpRequest::get("http://unused"))
            .await
            .unwrap();
        assert_eq!(reply.status, 200);
        let chunks: Vec<_> = reply.chunks.collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().as_ref(), b"chunked-body");
    }
}
