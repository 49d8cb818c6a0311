//! reqwest-backed `HttpBackend`

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::{Error, HttpBackend, HttpReply, HttpRequest, Result, StreamingReply};

/// Sends requests with a shared `reqwest::Client`.
///
/// Every request carries `timeout`, so a stalled provider cannot hold a flow
/// open indefinitely. Streaming requests only bound the time to first byte.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestBackend {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn build(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method, &request.uri)
            .headers(request.headers);
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type).body(request.body);
        } else if !request.body.is_empty() {
            builder = builder.body(request.body);
        }
        builder
    }

    fn map_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl HttpBackend for ReqwestBackend {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpReply>> + Send + '_>> {
        Box::pin(async move {
            let method = request.method.clone();
            let uri = request.uri.clone();
            let response = self
                .build(request)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| self.map_error(e))?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = response.text().await.map_err(|e| self.map_error(e))?;
            debug!(%method, %uri, status, bytes = body.len(), "http exchange complete");

            Ok(HttpReply {
                status,
                content_type,
                body,
            })
        })
    }

    fn stream(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StreamingReply>> + Send + '_>> {
        Box::pin(async move {
            let builder = self.build(request);
            let response = tokio::time::timeout(self.timeout, builder.send())
                .await
                .map_err(|_| Error::Timeout(self.timeout))?
                .map_err(|e| self.map_error(e))?;

            let status = response.status().as_u16();
            let chunks = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| Error::Http(format!("reading body chunk: {e}"))))
                .boxed();
            Ok(StreamingReply { status, chunks })
        })
    }
}
