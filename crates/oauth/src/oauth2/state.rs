//! OAuth2 flow state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `OAuth2Flow` executes the I/O implied by each action.

use crate::error::AuthError;

/// Flow states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuth2State {
    Idle,
    /// Binding the callback listener
    RequestingAuthorizationGrant,
    /// Browser opened; waiting for the redirect to `redirect_uri`
    AwaitingCallback { redirect_uri: String },
    /// Exchanging the authorization code
    RequestingAccessToken,
    /// Access token installed
    Complete,
    /// Refresh POST outstanding
    Refreshing,
    Failed { error: AuthError },
}

impl OAuth2State {
    /// A browser login is running.
    pub fn is_logging_in(&self) -> bool {
        matches!(
            self,
            OAuth2State::RequestingAuthorizationGrant
                | OAuth2State::AwaitingCallback { .. }
                | OAuth2State::RequestingAccessToken
        )
    }

    /// Login or refresh in progress.
    pub fn is_active(&self) -> bool {
        self.is_logging_in() || *self == OAuth2State::Refreshing
    }
}

#[derive(Debug)]
pub enum OAuth2Event {
    /// `login()` called
    Login,
    /// `resume()` called; `expiring` when the cached token is inside the margin
    Resume { expiring: bool },
    /// `refresh_access_token()` called
    RefreshRequested,
    ListenerReady { redirect_uri: String },
    CallbackReceived { code: String },
    /// Token endpoint issued an access token (code exchange or refresh)
    TokenGranted,
    Fail(AuthError),
    Cancel,
}

#[derive(Debug, PartialEq, Eq)]
pub enum OAuth2Action {
    StartListener,
    /// Open the browser at the authorization URL, then await the callback
    OpenBrowser { redirect_uri: String },
    RequestAccessToken { code: String, redirect_uri: String },
    Refresh,
    /// A refresh is already outstanding; wait for its outcome
    JoinRefresh,
    Report(Result<(), AuthError>),
    /// Event refused without changing state
    Reject(AuthError),
    None,
}

fn busy() -> AuthError {
    AuthError::busy("OAuth2 login or refresh already in progress")
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: OAuth2State, event: OAuth2Event) -> (OAuth2State, OAuth2Action) {
    match (state, event) {
        // --- Entry points ---
        (state, OAuth2Event::Login) if state.is_active() => (state, OAuth2Action::Reject(busy())),
        (_, OAuth2Event::Login) => (
            OAuth2State::RequestingAuthorizationGrant,
            OAuth2Action::StartListener,
        ),

        (state, OAuth2Event::Resume { .. }) if state.is_active() => {
            (state, OAuth2Action::Reject(busy()))
        }
        (_, OAuth2Event::Resume { expiring: true }) => {
            (OAuth2State::Refreshing, OAuth2Action::Refresh)
        }
        (_, OAuth2Event::Resume { expiring: false }) => {
            (OAuth2State::Complete, OAuth2Action::Report(Ok(())))
        }

        (OAuth2State::Refreshing, OAuth2Event::RefreshRequested) => {
            (OAuth2State::Refreshing, OAuth2Action::JoinRefresh)
        }
        (state, OAuth2Event::RefreshRequested) if state.is_logging_in() => {
            (state, OAuth2Action::Reject(busy()))
        }
        (_, OAuth2Event::RefreshRequested) => (OAuth2State::Refreshing, OAuth2Action::Refresh),

        // --- Login ---
        (
            OAuth2State::RequestingAuthorizationGrant,
            OAuth2Event::ListenerReady { redirect_uri },
        ) => (
            OAuth2State::AwaitingCallback {
                redirect_uri: redirect_uri.clone(),
            },
            OAuth2Action::OpenBrowser { redirect_uri },
        ),
        (OAuth2State::AwaitingCallback { redirect_uri }, OAuth2Event::CallbackReceived { code }) => (
            OAuth2State::RequestingAccessToken,
            OAuth2Action::RequestAccessToken { code, redirect_uri },
        ),

        // --- Token issued ---
        (
            OAuth2State::RequestingAccessToken | OAuth2State::Refreshing,
            OAuth2Event::TokenGranted,
        ) => (OAuth2State::Complete, OAuth2Action::Report(Ok(()))),

        // --- Failure and cancellation ---
        (state, OAuth2Event::Fail(error)) if state.is_active() => (
            OAuth2State::Failed {
                error: error.clone(),
            },
            OAuth2Action::Report(Err(error)),
        ),
        (state, OAuth2Event::Cancel) if state.is_active() => (
            OAuth2State::Idle,
            OAuth2Action::Report(Err(AuthError::cancelled())),
        ),

        // --- Out-of-order event: stay in current state ---
        (state, _event) => (state, OAuth2Action::None),
    }
}
