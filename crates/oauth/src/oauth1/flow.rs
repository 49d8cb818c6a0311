//! OAuth 1.0a three-legged handshake driver
//!
//! Executes the actions of the `state` machine: binds the loopback listener,
//! POSTs signed requests to the temporary-credential and token endpoints,
//! opens the browser, and validates the redirect callback. The negotiated
//! credentials live in the flow's `OAuth1Filter`.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use tokio::sync::{Notify, watch};
use tracing::{info, instrument, warn};
use transport::{BrowserLauncher, CallbackRequest, HttpBackend, HttpRequest, LoopbackListener};

use super::filter::OAuth1Filter;
use super::state::{OAuth1Action, OAuth1Event, OAuth1State, handle_event};
use crate::codec::{ParamMap, parse_query, percent_encode};
use crate::constants::{
    DEFAULT_AUTHORIZATION_TIMEOUT, DEFAULT_FAILURE_HTML, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SUCCESS_HTML, OAUTH1_CALLBACK_PATH,
};
use crate::error::{AuthError, Result};
use crate::exchange::{expect_body, send_bounded};
use crate::telemetry;

/// Provider endpoints and handshake options.
#[derive(Debug, Clone)]
pub struct OAuth1Settings {
    pub temporary_request_uri: String,
    pub authorize_uri: String,
    pub token_request_uri: String,
    pub callback_path: String,
    /// Require `oauth_callback_confirmed=true` on the temporary-credential reply
    pub require_callback_confirmed: bool,
    pub success_html: String,
    pub failure_html: String,
    pub request_timeout: Duration,
    pub authorization_timeout: Duration,
}

impl OAuth1Settings {
    pub fn new(
        temporary_request_uri: impl Into<String>,
        authorize_uri: impl Into<String>,
        token_request_uri: impl Into<String>,
    ) -> Self {
        Self {
            temporary_request_uri: temporary_request_uri.into(),
            authorize_uri: authorize_uri.into(),
            token_request_uri: token_request_uri.into(),
            callback_path: OAUTH1_CALLBACK_PATH.to_string(),
            require_callback_confirmed: false,
            success_html: DEFAULT_SUCCESS_HTML.to_string(),
            failure_html: DEFAULT_FAILURE_HTML.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
        }
    }
}

/// Drives the OAuth1 handshake and owns the signing filter.
pub struct OAuth1Flow {
    settings: OAuth1Settings,
    backend: Arc<dyn HttpBackend>,
    browser: Arc<dyn BrowserLauncher>,
    filter: Arc<OAuth1Filter>,
    state: watch::Sender<OAuth1State>,
    cancelled: Notify,
}

impl OAuth1Flow {
    pub fn new(
        settings: OAuth1Settings,
        backend: Arc<dyn HttpBackend>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let (state, _) = watch::channel(OAuth1State::Idle);
        Self {
            settings,
            backend,
            browser,
            filter: Arc::new(OAuth1Filter::new()),
            state,
            cancelled: Notify::new(),
        }
    }

    /// The signing filter; install it into an `HttpClient` pipeline.
    pub fn filter(&self) -> Arc<OAuth1Filter> {
        self.filter.clone()
    }

    pub fn state(&self) -> OAuth1State {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OAuth1State> {
        self.state.subscribe()
    }

    /// Run the full handshake. Resolves once, with `Ok(())` when the filter
    /// holds the final token credentials.
    #[instrument(skip_all)]
    pub async fn authorize(&self, consumer_key: &str, consumer_secret: Secret<String>) -> Result<()> {
        let cancelled = self.cancelled.notified();
        if let OAuth1Action::Reject(error) = self.transition(OAuth1Event::Start) {
            return Err(error);
        }
        info!("starting OAuth1 authorization");

        self.filter.set_consumer(consumer_key, consumer_secret);
        self.filter.set_token("", Secret::default());

        let mut listener = None;
        let result = tokio::select! {
            result = self.drive(&mut listener) => result,
            _ = cancelled => Err(AuthError::cancelled()),
        };
        if let Some(mut listener) = listener {
            listener.stop();
        }

        match &result {
            Ok(()) => info!("OAuth1 authorization complete"),
            Err(e) => {
                self.filter.set_token("", Secret::default());
                warn!(error = %e, "OAuth1 authorization failed");
            }
        }
        telemetry::record_handshake("oauth1", &result);
        result
    }

    /// Abort a running handshake. The pending `authorize` returns
    /// `Cancelled` and the state returns to `Idle`.
    pub fn cancel(&self) -> bool {
        let aborted = matches!(self.transition(OAuth1Event::Cancel), OAuth1Action::Report(_));
        if aborted {
            info!("OAuth1 authorization cancelled");
            self.cancelled.notify_waiters();
        }
        aborted
    }

    fn transition(&self, event: OAuth1Event) -> OAuth1Action {
        let mut action = OAuth1Action::None;
        self.state.send_modify(|state| {
            let current = std::mem::replace(state, OAuth1State::Idle);
            let (next, next_action) = handle_event(current, event);
            *state = next;
            action = next_action;
        });
        action
    }

    async fn drive(&self, listener: &mut Option<LoopbackListener>) -> Result<()> {
        let mut action = OAuth1Action::StartListener;
        loop {
            let mut callback = None;
            let event = match action {
                OAuth1Action::StartListener => {
                    match LoopbackListener::bind(&self.settings.callback_path).await {
                        Ok(bound) => {
                            let callback_url = bound.callback_url();
                            *listener = Some(bound);
                            OAuth1Event::ListenerReady { callback_url }
                        }
                        Err(e) => OAuth1Event::Fail(e.into()),
                    }
                }
                OAuth1Action::RequestTemporaryCredentials { callback_url } => {
                    match self.request_temporary_credentials(&callback_url).await {
                        Ok(request_token) => {
                            OAuth1Event::TemporaryCredentialsGranted { request_token }
                        }
                        Err(e) => OAuth1Event::Fail(e),
                    }
                }
                OAuth1Action::OpenBrowser { request_token } => {
                    match self.await_authorization(listener, &request_token).await {
                        Ok((request, token, verifier)) => {
                            callback = Some(request);
                            OAuth1Event::CallbackReceived { token, verifier }
                        }
                        Err(e) => OAuth1Event::Fail(e),
                    }
                }
                OAuth1Action::RequestToken { verifier } => {
                    match self.request_token(&verifier).await {
                        Ok(()) => OAuth1Event::TokenGranted,
                        Err(e) => OAuth1Event::Fail(e),
                    }
                }
                OAuth1Action::Report(result) => return result,
                OAuth1Action::Reject(error) => return Err(error),
                OAuth1Action::None => return Err(AuthError::cancelled()),
            };

            action = self.transition(event);

            if let Some(request) = callback {
                let page = match &action {
                    OAuth1Action::RequestToken { .. } => &self.settings.success_html,
                    _ => &self.settings.failure_html,
                };
                request.respond(page.clone());
            }
        }
    }

    async fn request_temporary_credentials(&self, callback_url: &str) -> Result<String> {
        let mut extra = ParamMap::new();
        extra.insert("oauth_callback".into(), callback_url.to_string());

        let mut request = HttpRequest::post(&self.settings.temporary_request_uri);
        self.filter.sign_request(&mut request, &extra)?;
        let reply = send_bounded(
            self.backend.as_ref(),
            request,
            self.settings.request_timeout,
        )
        .await?;
        let params = parse_query(&expect_body(reply, "temporary-credential endpoint")?);

        if self.settings.require_callback_confirmed
            && params.get("oauth_callback_confirmed").map(String::as_str) != Some("true")
        {
            return Err(AuthError::protocol("oauth_callback_confirmed is not true"));
        }
        let (token, secret) = token_pair(&params, "temporary-credential endpoint")?;
        self.filter.set_token(&token, secret);
        Ok(token)
    }

    async fn await_authorization(
        &self,
        listener: &mut Option<LoopbackListener>,
        request_token: &str,
    ) -> Result<(CallbackRequest, String, String)> {
        let listener = listener
            .as_mut()
            .ok_or_else(|| AuthError::system("callback listener is not running"))?;
        let callback_url = listener.callback_url();

        let separator = if self.settings.authorize_uri.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{separator}oauth_token={}&oauth_callback={}",
            self.settings.authorize_uri,
            percent_encode(request_token),
            percent_encode(&callback_url),
        );
        self.browser.open(&url)?;

        let request = tokio::time::timeout(
            self.settings.authorization_timeout,
            listener.next_request(),
        )
        .await
        .map_err(|_| AuthError::system("timed out waiting for the authorization callback"))?
        .ok_or_else(|| AuthError::system("callback listener stopped"))?;

        match parse_callback(&request) {
            Ok((token, verifier)) => Ok((request, token, verifier)),
            Err(e) => {
                request.respond(self.settings.failure_html.clone());
                Err(e)
            }
        }
    }

    async fn request_token(&self, verifier: &str) -> Result<()> {
        let mut extra = ParamMap::new();
        if !verifier.is_empty() {
            extra.insert("oauth_verifier".into(), verifier.to_string());
        }

        let mut request = HttpRequest::post(&self.settings.token_request_uri);
        self.filter.sign_request(&mut request, &extra)?;
        let reply = send_bounded(
            self.backend.as_ref(),
            request,
            self.settings.request_timeout,
        )
        .await?;
        let params = parse_query(&expect_body(reply, "token endpoint")?);

        let (token, secret) = token_pair(&params, "token endpoint")?;
        self.filter.set_token(&token, secret);
        Ok(())
    }
}

/// Extract `(oauth_token, oauth_verifier)` from the browser redirect.
fn parse_callback(request: &CallbackRequest) -> Result<(String, String)> {
    if request.method != reqwest::Method::GET {
        return Err(AuthError::protocol(format!(
            "unexpected {} request on callback",
            request.method
        )));
    }
    let query = request
        .query
        .as_deref()
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AuthError::protocol("callback carried no query"))?;
    let mut params = parse_query(query);
    let token = params
        .remove("oauth_token")
        .ok_or_else(|| AuthError::protocol("callback is missing oauth_token"))?;
    let verifier = params.remove("oauth_verifier").unwrap_or_default();
    Ok((token, verifier))
}

fn token_pair(params: &ParamMap, endpoint: &str) -> Result<(String, Secret<String>)> {
    let token = params.get("oauth_token").filter(|t| !t.is_empty());
    let secret = params.get("oauth_token_secret").filter(|s| !s.is_empty());
    match (token, secret) {
        (Some(token), Some(secret)) => Ok((token.clone(), Secret::from(secret.as_str()))),
        _ => Err(AuthError::protocol(format!(
            "{endpoint} reply lacks oauth_token or oauth_token_secret"
        ))),
    }
}
