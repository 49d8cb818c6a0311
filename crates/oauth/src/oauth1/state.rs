//! OAuth1 handshake state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `OAuth1Flow` executes the I/O implied by each action and feeds the
//! outcome back as the next event.

use crate::error::AuthError;

/// Handshake states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuth1State {
    Idle,
    /// Binding the callback listener, then POSTing to the temporary-credential endpoint
    RequestingTemporaryCredentials,
    /// Browser opened; waiting for the provider to redirect back
    AwaitingResourceOwnerAuthorization { request_token: String },
    /// Exchanging the verifier for token credentials
    RequestingToken,
    Complete,
    Failed { error: AuthError },
}

impl OAuth1State {
    /// A handshake is running; a second `authorize` is refused.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OAuth1State::RequestingTemporaryCredentials
                | OAuth1State::AwaitingResourceOwnerAuthorization { .. }
                | OAuth1State::RequestingToken
        )
    }
}

#[derive(Debug)]
pub enum OAuth1Event {
    /// `authorize()` called
    Start,
    /// Loopback listener bound
    ListenerReady { callback_url: String },
    /// Temporary-credential endpoint issued a request token
    TemporaryCredentialsGranted { request_token: String },
    /// Browser redirect arrived with a token and (possibly empty) verifier
    CallbackReceived { token: String, verifier: String },
    /// Token endpoint issued the final token credentials
    TokenGranted,
    /// Any step failed
    Fail(AuthError),
    /// Caller cancelled
    Cancel,
}

/// I/O the caller should perform after a transition.
#[derive(Debug, PartialEq, Eq)]
pub enum OAuth1Action {
    StartListener,
    RequestTemporaryCredentials { callback_url: String },
    /// Open the browser at the authorization URL, then await the callback
    OpenBrowser { request_token: String },
    RequestToken { verifier: String },
    /// Handshake finished; hand the outcome to the caller
    Report(Result<(), AuthError>),
    /// Event refused without changing state
    Reject(AuthError),
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: OAuth1State, event: OAuth1Event) -> (OAuth1State, OAuth1Action) {
    match (state, event) {
        // --- Start ---
        (state, OAuth1Event::Start) if state.is_active() => (
            state,
            OAuth1Action::Reject(AuthError::busy("OAuth1 authorization already in progress")),
        ),
        (_, OAuth1Event::Start) => (
            OAuth1State::RequestingTemporaryCredentials,
            OAuth1Action::StartListener,
        ),

        // --- RequestingTemporaryCredentials ---
        (
            OAuth1State::RequestingTemporaryCredentials,
            OAuth1Event::ListenerReady { callback_url },
        ) => (
            OAuth1State::RequestingTemporaryCredentials,
            OAuth1Action::RequestTemporaryCredentials { callback_url },
        ),
        (
            OAuth1State::RequestingTemporaryCredentials,
            OAuth1Event::TemporaryCredentialsGranted { request_token },
        ) => (
            OAuth1State::AwaitingResourceOwnerAuthorization {
                request_token: request_token.clone(),
            },
            OAuth1Action::OpenBrowser { request_token },
        ),

        // --- AwaitingResourceOwnerAuthorization ---
        (
            OAuth1State::AwaitingResourceOwnerAuthorization { request_token },
            OAuth1Event::CallbackReceived { token, verifier },
        ) => {
            if token == request_token {
                (
                    OAuth1State::RequestingToken,
                    OAuth1Action::RequestToken { verifier },
                )
            } else {
                fail(AuthError::protocol(
                    "callback oauth_token does not match the request token",
                ))
            }
        }

        // --- RequestingToken ---
        (OAuth1State::RequestingToken, OAuth1Event::TokenGranted) => {
            (OAuth1State::Complete, OAuth1Action::Report(Ok(())))
        }

        // --- Failure and cancellation ---
        (state, OAuth1Event::Fail(error)) if state.is_active() => fail(error),
        (state, OAuth1Event::Cancel) if state.is_active() => (
            OAuth1State::Idle,
            OAuth1Action::Report(Err(AuthError::cancelled())),
        ),

        // --- Out-of-order event: stay in current state ---
        (state, _event) => (state, OAuth1Action::None),
    }
}

fn fail(error: AuthError) -> (OAuth1State, OAuth1Action) {
    (
        OAuth1State::Failed {
            error: error.clone(),
        },
        OAuth1Action::Report(Err(error)),
    )
}
