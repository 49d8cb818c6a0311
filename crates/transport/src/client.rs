//! Filtered HTTP client
//!
//! `HttpClient` is what application code talks to: every request runs through
//! the ordered filter `Pipeline` (authentication stamping, request queuing)
//! and is then dispatched on the backend under a wall-clock timeout.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::{Error, HttpBackend, HttpReply, HttpRequest, RequestFilter, Result, StreamingReply};

/// Ordered list of request filters applied before dispatch.
#[derive(Default)]
pub struct Pipeline {
    filters: RwLock<Vec<Arc<dyn RequestFilter>>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter. A filter with the same id replaces the existing one
    /// in place, so re-running a login does not stamp requests twice.
    pub fn add(&self, filter: Arc<dyn RequestFilter>) {
        let mut filters = self.filters.write().unwrap_or_else(PoisonError::into_inner);
        match filters.iter().position(|f| f.id() == filter.id()) {
            Some(idx) => filters[idx] = filter,
            None => filters.push(filter),
        }
    }

    /// Remove a filter by id. Returns whether one was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut filters = self.filters.write().unwrap_or_else(PoisonError::into_inner);
        let before = filters.len();
        filters.retain(|f| f.id() != id);
        filters.len() != before
    }

    pub fn ids(&self) -> Vec<String> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|f| f.id().to_string())
            .collect()
    }

    /// Run `request` through every filter in order.
    pub async fn apply(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        // Snapshot so no lock is held while a filter awaits.
        let filters: Vec<Arc<dyn RequestFilter>> = self
            .filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for filter in filters {
            request = filter.filter(request).await?;
        }
        Ok(request)
    }
}

/// HTTP client with a request-filter pipeline in front of the backend.
#[derive(Clone)]
pub struct HttpClient {
    backend: Arc<dyn HttpBackend>,
    pipeline: Arc<Pipeline>,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(backend: Arc<dyn HttpBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            pipeline: Arc::new(Pipeline::new()),
            timeout,
        }
    }

    /// The backend requests are dispatched on, unfiltered.
    pub fn backend(&self) -> Arc<dyn HttpBackend> {
        self.backend.clone()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn add_request_filter(&self, filter: Arc<dyn RequestFilter>) {
        debug!(filter = filter.id(), "installing request filter");
        self.pipeline.add(filter);
    }

    /// Filter and send a request, returning the buffered reply.
    ///
    /// The timeout covers dispatch only; time spent held back by a filter
    /// (e.g. waiting for a token refresh) is not counted.
    #[instrument(skip_all, fields(method = %request.method, uri = %request.uri))]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpReply> {
        let request = self.pipeline.apply(request).await?;
        tokio::time::timeout(self.timeout, self.backend.send(request))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }

    /// Filter and send a request, returning the body as a chunk stream.
    #[instrument(skip_all, fields(method = %request.method, uri = %request.uri))]
    pub async fn stream(&self, request: HttpRequest) -> Result<StreamingReply> {
        let request = self.pipeline.apply(request).await?;
        tokio::time::timeout(self.timeout, self.backend.stream(request))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}
