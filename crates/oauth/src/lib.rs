//! Client-side OAuth authentication
//!
//! Obtains delegated-access credentials, signs or stamps outgoing requests
//! with them, and refreshes them before they expire. Two schemes:
//!
//! - OAuth 1.0a three-legged handshake (`oauth1`): HMAC-SHA1 signed
//!   `Authorization: OAuth ...` headers.
//! - OAuth 2.0 authorization-code grant with refresh tokens (`oauth2`):
//!   `Authorization: Bearer ...` headers, with requests held back while an
//!   expiring token is refreshed.
//!
//! Typical OAuth2 use:
//! 1. Build an `OAuth2Flow` over a backend and browser launcher
//! 2. `session::authenticate_oauth2()` resumes from the `CredentialCache`
//!    or runs the browser login
//! 3. The flow's `OAuth2Filter` is installed into the `HttpClient` pipeline
//! 4. Requests sent through the client are stamped; the filter refreshes
//!    the token on demand and releases held requests in order

pub mod codec;
pub mod constants;
pub mod credentials;
pub mod error;
mod exchange;
pub mod oauth1;
pub mod oauth2;
pub mod pkce;
pub mod session;
pub mod signature;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{ParamMap, ParamMode};
pub use credentials::{
    CredentialCache, FileSecretStore, MemorySecretStore, SecretStore, TokenSet,
};
pub use error::{AuthError, ErrorKind, Result, StoreError};
pub use oauth1::{OAuth1Filter, OAuth1Flow, OAuth1Settings};
pub use oauth2::{CredentialsObserver, OAuth2Filter, OAuth2Flow, OAuth2Settings};
pub use session::{authenticate_oauth2, authorize_oauth1, spawn_token_persister};
