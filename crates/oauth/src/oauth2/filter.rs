//! Bearer-token stamping with a hold-back queue
//!
//! Requests made while the access token is inside the expiry margin are
//! queued, a single refresh is started, and the queue is released in FIFO
//! order once the refresh outcome is known: stamped with the new token on
//! success, unstamped on failure so the server's 401 reaches the caller.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::Secret;
use reqwest::header::AUTHORIZATION;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use transport::{HttpRequest, RequestFilter};

use super::flow::{CredentialsObserver, OAuth2Flow};
use crate::constants::EXPIRY_MARGIN;
use crate::credentials::unix_now;
use crate::error::AuthError;
use crate::telemetry;

/// Receives a request once the filter lets it go.
pub type Continuation = Box<dyn FnOnce(HttpRequest) + Send>;

struct Inner {
    access_token: Secret<String>,
    valid_until: i64,
    queue: VecDeque<(HttpRequest, Continuation)>,
    refreshing: bool,
}

/// Stamps `Authorization: Bearer <token>` and refreshes on demand.
pub struct OAuth2Filter {
    flow: Arc<OAuth2Flow>,
    margin: Duration,
    inner: Mutex<Inner>,
}

impl OAuth2Filter {
    /// Create a filter seeded with the flow's current token and register it
    /// as the flow's observer.
    pub fn new(flow: Arc<OAuth2Flow>) -> Arc<Self> {
        let tokens = flow.tokens();
        let filter = Arc::new(Self {
            flow: flow.clone(),
            margin: EXPIRY_MARGIN,
            inner: Mutex::new(Inner {
                access_token: tokens.access_token,
                valid_until: tokens.valid_until,
                queue: VecDeque::new(),
                refreshing: false,
            }),
        });
        let observer: Arc<dyn CredentialsObserver> = filter.clone();
        flow.add_observer(Arc::downgrade(&observer));
        filter
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests held back waiting for a refresh.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Stamp and continue, continue unstamped, or hold back until a refresh
    /// completes. `continuation` runs exactly once, never under the lock.
    pub fn submit(&self, mut request: HttpRequest, continuation: Continuation) {
        let mut inner = self.lock();

        if inner.access_token.is_empty() {
            drop(inner);
            debug!(uri = %request.uri, "no access token, request sent unstamped");
            continuation(request);
            return;
        }

        if unix_now() + self.margin.as_secs() as i64 > inner.valid_until {
            inner.queue.push_back((request, continuation));
            let start_refresh = !inner.refreshing;
            inner.refreshing = true;
            let queued = inner.queue.len();
            drop(inner);

            telemetry::record_queued();
            debug!(queued, "access token expiring, request held back");
            if start_refresh {
                self.start_refresh();
            }
            return;
        }

        let token = inner.access_token.clone();
        drop(inner);
        stamp(&mut request, &token);
        continuation(request);
    }

    /// Refresh on a spawned task. Its outcome reaches this filter through
    /// the observer callbacks.
    fn start_refresh(&self) {
        let flow = self.flow.clone();
        tokio::spawn(async move {
            if let Err(e) = flow.refresh_access_token().await {
                debug!(error = %e, "filter-triggered refresh did not produce a token");
            }
        });
    }

    /// Take the queue and clear the refreshing flag; the caller releases.
    fn take_queue(&self) -> VecDeque<(HttpRequest, Continuation)> {
        let mut inner = self.lock();
        inner.refreshing = false;
        std::mem::take(&mut inner.queue)
    }
}

fn stamp(request: &mut HttpRequest, token: &Secret<String>) {
    match request.set_header(AUTHORIZATION, &format!("Bearer {}", token.expose())) {
        Ok(()) => telemetry::record_signed("bearer"),
        Err(e) => warn!(error = %e, "access token is not a valid header value, request sent unstamped"),
    }
}

impl CredentialsObserver for OAuth2Filter {
    fn credentials_updated(&self, access_token: &Secret<String>, valid_until: i64) {
        let queue = {
            let mut inner = self.lock();
            inner.access_token = access_token.clone();
            inner.valid_until = valid_until;
            inner.refreshing = false;
            std::mem::take(&mut inner.queue)
        };
        if !queue.is_empty() {
            debug!(released = queue.len(), "releasing held requests with new token");
        }
        for (mut request, continuation) in queue {
            stamp(&mut request, access_token);
            continuation(request);
        }
    }

    fn refresh_failed(&self, error: &AuthError) {
        let queue = self.take_queue();
        if !queue.is_empty() {
            warn!(error = %error, released = queue.len(), "token refresh failed, releasing held requests unstamped");
        }
        for (request, continuation) in queue {
            continuation(request);
        }
    }
}

impl RequestFilter for OAuth2Filter {
    fn id(&self) -> &str {
        "oauth2"
    }

    fn filter(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<HttpRequest>> + Send + '_>> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            request,
            Box::new(move |request| {
                let _ = tx.send(request);
            }),
        );
        Box::pin(async move {
            rx.await.map_err(|_| {
                transport::Error::Filter("request dropped while waiting for token refresh".into())
            })
        })
    }
}
