//! OAuth 2.0 authorization-code and refresh-token driver
//!
//! Owns the negotiated `TokenSet` and the flow state. Observers (the
//! `OAuth2Filter`) are told about every installed token and every failed
//! refresh; they are held weakly so a dropped filter simply stops hearing.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use common::Secret;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, instrument, warn};
use transport::{BrowserLauncher, CallbackRequest, HttpBackend, LoopbackListener};

use super::state::{OAuth2Action, OAuth2Event, OAuth2State, handle_event};
use super::token::{TokenGrant, code_exchange_request, parse_token_reply, refresh_request};
use crate::codec::{ParamMap, ParamMode, parse_query, serialize};
use crate::constants::{
    DEFAULT_AUTHORIZATION_TIMEOUT, DEFAULT_FAILURE_HTML, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SUCCESS_HTML, EXPIRY_MARGIN, OAUTH2_CALLBACK_PATH,
};
use crate::credentials::{TokenSet, unix_now};
use crate::error::{AuthError, Result};
use crate::exchange::send_bounded;
use crate::{pkce, telemetry};

/// Told about credential changes made by an `OAuth2Flow`.
pub trait CredentialsObserver: Send + Sync {
    /// A new access token was installed.
    fn credentials_updated(&self, access_token: &Secret<String>, valid_until: i64);

    /// A refresh finished without producing a token.
    fn refresh_failed(&self, error: &AuthError);
}

/// Client registration and provider endpoints.
#[derive(Debug, Clone)]
pub struct OAuth2Settings {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub scope: String,
    pub callback_path: String,
    pub use_pkce: bool,
    pub success_html: String,
    pub failure_html: String,
    pub request_timeout: Duration,
    pub authorization_timeout: Duration,
}

impl OAuth2Settings {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        auth_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            auth_endpoint: auth_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            scope: scope.into(),
            callback_path: OAUTH2_CALLBACK_PATH.to_string(),
            use_pkce: false,
            success_html: DEFAULT_SUCCESS_HTML.to_string(),
            failure_html: DEFAULT_FAILURE_HTML.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
        }
    }
}

/// Drives the OAuth2 login and refresh exchanges.
pub struct OAuth2Flow {
    settings: OAuth2Settings,
    backend: Arc<dyn HttpBackend>,
    browser: Arc<dyn BrowserLauncher>,
    state: watch::Sender<OAuth2State>,
    tokens: Mutex<TokenSet>,
    observers: Mutex<Vec<Weak<dyn CredentialsObserver>>>,
    cancelled: Notify,
}

impl OAuth2Flow {
    pub fn new(
        settings: OAuth2Settings,
        backend: Arc<dyn HttpBackend>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let (state, _) = watch::channel(OAuth2State::Idle);
        Self {
            settings,
            backend,
            browser,
            state,
            tokens: Mutex::new(TokenSet::new("", "", 0)),
            observers: Mutex::new(Vec::new()),
            cancelled: Notify::new(),
        }
    }

    pub fn state(&self) -> OAuth2State {
        self.state.borrow().clone()
    }

    /// Watch state changes, e.g. to persist tokens on every `Complete`.
    pub fn subscribe(&self) -> watch::Receiver<OAuth2State> {
        self.state.subscribe()
    }

    /// Current tokens. The access token is empty while a refresh is outstanding.
    pub fn tokens(&self) -> TokenSet {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_observer(&self, observer: Weak<dyn CredentialsObserver>) {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|o| o.strong_count() > 0);
        observers.push(observer);
    }

    /// Run the browser login: authorization request, callback, code exchange.
    #[instrument(skip_all)]
    pub async fn login(&self) -> Result<()> {
        let cancelled = self.cancelled.notified();
        if let OAuth2Action::Reject(error) = self.transition(OAuth2Event::Login) {
            return Err(error);
        }
        info!(client_id = %self.settings.client_id, "starting OAuth2 login");

        let mut listener = None;
        let result = tokio::select! {
            result = self.drive_login(&mut listener) => result,
            _ = cancelled => Err(AuthError::cancelled()),
        };
        if let Some(mut listener) = listener {
            listener.stop();
        }

        match &result {
            Ok(()) => info!("OAuth2 login complete"),
            Err(e) => warn!(error = %e, "OAuth2 login failed"),
        }
        telemetry::record_handshake("oauth2", &result);
        result
    }

    /// Install cached tokens. Refreshes first when the access token is
    /// within the expiry margin.
    #[instrument(skip_all, fields(valid_until = tokens.valid_until))]
    pub async fn resume(&self, tokens: TokenSet) -> Result<()> {
        let cancelled = self.cancelled.notified();
        let expiring = tokens.expires_within(EXPIRY_MARGIN, unix_now());
        match self.transition(OAuth2Event::Resume { expiring }) {
            OAuth2Action::Reject(error) => return Err(error),
            OAuth2Action::Report(result) => {
                self.install(tokens);
                info!("resumed OAuth2 session from cached credentials");
                return result;
            }
            _ => {}
        }

        info!("cached access token is expiring, refreshing");
        self.install(tokens);
        self.perform_refresh(cancelled).await
    }

    /// Exchange the refresh token for a new access token. A call made while a
    /// refresh is outstanding waits for that refresh instead of sending another.
    #[instrument(skip_all)]
    pub async fn refresh_access_token(&self) -> Result<()> {
        let cancelled = self.cancelled.notified();
        if self.tokens().refresh_token.is_empty() {
            let error = AuthError::failed("no refresh token available");
            self.notify_refresh_failed(&error);
            return Err(error);
        }
        match self.transition(OAuth2Event::RefreshRequested) {
            OAuth2Action::Refresh => self.perform_refresh(cancelled).await,
            OAuth2Action::JoinRefresh => {
                debug!("joining outstanding refresh");
                self.join_refresh().await
            }
            OAuth2Action::Reject(error) => {
                self.notify_refresh_failed(&error);
                Err(error)
            }
            other => Err(AuthError::failed(format!(
                "unexpected refresh transition: {other:?}"
            ))),
        }
    }

    /// Abort a running login or refresh. The pending call returns
    /// `Cancelled` and the state returns to `Idle`.
    pub fn cancel(&self) -> bool {
        let aborted = matches!(self.transition(OAuth2Event::Cancel), OAuth2Action::Report(_));
        if aborted {
            info!("OAuth2 operation cancelled");
            self.cancelled.notify_waiters();
        }
        aborted
    }

    fn transition(&self, event: OAuth2Event) -> OAuth2Action {
        let mut action = OAuth2Action::None;
        self.state.send_modify(|state| {
            let current = std::mem::replace(state, OAuth2State::Idle);
            let (next, next_action) = handle_event(current, event);
            *state = next;
            action = next_action;
        });
        action
    }

    fn observers(&self) -> Vec<Arc<dyn CredentialsObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Replace the stored tokens and tell observers.
    fn install(&self, tokens: TokenSet) {
        let access_token = tokens.access_token.clone();
        let valid_until = tokens.valid_until;
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = tokens;
        for observer in self.observers() {
            observer.credentials_updated(&access_token, valid_until);
        }
    }

    fn notify_refresh_failed(&self, error: &AuthError) {
        for observer in self.observers() {
            observer.refresh_failed(error);
        }
    }

    fn install_grant(&self, grant: TokenGrant) {
        let mut tokens = self.tokens();
        tokens.access_token = grant.access_token;
        if let Some(refresh_token) = grant.refresh_token {
            tokens.refresh_token = refresh_token;
        }
        tokens.valid_until = unix_now().saturating_add(grant.expires_in);
        debug!(valid_until = tokens.valid_until, "installing access token");
        self.install(tokens);
    }

    async fn perform_refresh(&self, cancelled: tokio::sync::futures::Notified<'_>) -> Result<()> {
        let started = Instant::now();
        let result = tokio::select! {
            result = self.run_refresh() => result,
            _ = cancelled => Err(AuthError::cancelled()),
        };

        match &result {
            Ok(()) => info!("access token refreshed"),
            Err(e) => {
                warn!(error = %e, "access token refresh failed");
                self.notify_refresh_failed(e);
            }
        }
        telemetry::record_refresh(&result, started.elapsed().as_secs_f64());
        result
    }

    async fn run_refresh(&self) -> Result<()> {
        let refresh_token = {
            let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
            tokens.access_token = Secret::default();
            tokens.refresh_token.clone()
        };

        let request = refresh_request(
            &self.settings.token_endpoint,
            &self.settings.client_id,
            &self.settings.client_secret,
            &refresh_token,
        );
        let event = match self.request_grant(request).await {
            Ok(grant) => {
                self.install_grant(grant);
                OAuth2Event::TokenGranted
            }
            Err(e) => OAuth2Event::Fail(e),
        };

        match self.transition(event) {
            OAuth2Action::Report(result) => result,
            _ => Err(AuthError::cancelled()),
        }
    }

    async fn join_refresh(&self) -> Result<()> {
        let mut state = self.state.subscribe();
        let settled = state
            .wait_for(|s| *s != OAuth2State::Refreshing)
            .await
            .map_err(|_| AuthError::failed("flow state channel closed"))?;
        match &*settled {
            OAuth2State::Complete => Ok(()),
            OAuth2State::Failed { error } => Err(error.clone()),
            _ => Err(AuthError::cancelled()),
        }
    }

    async fn request_grant(&self, request: transport::HttpRequest) -> Result<TokenGrant> {
        let reply = send_bounded(
            self.backend.as_ref(),
            request,
            self.settings.request_timeout,
        )
        .await?;
        parse_token_reply(&reply)
    }

    async fn drive_login(&self, listener: &mut Option<LoopbackListener>) -> Result<()> {
        let verifier = self.settings.use_pkce.then(pkce::generate_verifier);
        let mut action = OAuth2Action::StartListener;
        loop {
            let mut callback = None;
            let event = match action {
                OAuth2Action::StartListener => {
                    match LoopbackListener::bind(&self.settings.callback_path).await {
                        Ok(bound) => {
                            let redirect_uri = bound.callback_url();
                            *listener = Some(bound);
                            OAuth2Event::ListenerReady { redirect_uri }
                        }
                        Err(e) => OAuth2Event::Fail(e.into()),
                    }
                }
                OAuth2Action::OpenBrowser { redirect_uri } => {
                    match self
                        .await_authorization(listener, &redirect_uri, verifier.as_deref())
                        .await
                    {
                        Ok((request, code)) => {
                            callback = Some(request);
                            OAuth2Event::CallbackReceived { code }
                        }
                        Err(e) => OAuth2Event::Fail(e),
                    }
                }
                OAuth2Action::RequestAccessToken { code, redirect_uri } => {
                    let request = code_exchange_request(
                        &self.settings.token_endpoint,
                        &self.settings.client_id,
                        &self.settings.client_secret,
                        &code,
                        &redirect_uri,
                        verifier.as_deref(),
                    );
                    match self.request_grant(request).await {
                        Ok(grant) if grant.refresh_token.is_none() => OAuth2Event::Fail(
                            AuthError::protocol("token response lacks refresh_token"),
                        ),
                        Ok(grant) => {
                            self.install_grant(grant);
                            OAuth2Event::TokenGranted
                        }
                        Err(e) => OAuth2Event::Fail(e),
                    }
                }
                OAuth2Action::Report(result) => return result,
                OAuth2Action::Reject(error) => return Err(error),
                OAuth2Action::Refresh | OAuth2Action::JoinRefresh | OAuth2Action::None => {
                    return Err(AuthError::cancelled());
                }
            };

            action = self.transition(event);

            if let Some(request) = callback {
                let page = match &action {
                    OAuth2Action::RequestAccessToken { .. } => &self.settings.success_html,
                    _ => &self.settings.failure_html,
                };
                request.respond(page.clone());
            }
        }
    }

    fn authorization_url(&self, redirect_uri: &str, verifier: Option<&str>) -> String {
        let mut params = ParamMap::new();
        params.insert("response_type".into(), "code".into());
        params.insert("client_id".into(), self.settings.client_id.clone());
        params.insert("redirect_uri".into(), redirect_uri.to_string());
        params.insert("scope".into(), self.settings.scope.clone());
        if let Some(verifier) = verifier {
            params.insert("code_challenge".into(), pkce::compute_challenge(verifier));
            params.insert("code_challenge_method".into(), "S256".into());
        }
        let separator = if self.settings.auth_endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}{}",
            self.settings.auth_endpoint,
            serialize(&params, ParamMode::Body)
        )
    }

    async fn await_authorization(
        &self,
        listener: &mut Option<LoopbackListener>,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<(CallbackRequest, String)> {
        let listener = listener
            .as_mut()
            .ok_or_else(|| AuthError::system("callback listener is not running"))?;

        self.browser
            .open(&self.authorization_url(redirect_uri, verifier))?;

        let request = tokio::time::timeout(
            self.settings.authorization_timeout,
            listener.next_request(),
        )
        .await
        .map_err(|_| AuthError::system("timed out waiting for the authorization callback"))?
        .ok_or_else(|| AuthError::system("callback listener stopped"))?;

        match parse_callback(&request) {
            Ok(code) => Ok((request, code)),
            Err(e) => {
                request.respond(self.settings.failure_html.clone());
                Err(e)
            }
        }
    }
}

/// Extract the authorization code from the browser redirect.
fn parse_callback(request: &CallbackRequest) -> Result<String> {
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
    if let Some(error) = params.remove("error") {
        let detail = match params.remove("error_description") {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        return Err(AuthError::server(detail));
    }
    params
        .remove("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::protocol("callback is missing code"))
}
