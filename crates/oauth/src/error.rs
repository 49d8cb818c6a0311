//! Error types for OAuth authentication operations

use std::fmt;

/// Outcome class of a failed flow operation.
///
/// Success is `Ok(())`; every failure carries one of these kinds so callers
/// can decide whether to prompt for re-authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Another handshake or refresh is already in progress
    Busy,
    /// Local resource failure: listener bind, browser launch, network, timeout
    System,
    /// Malformed or unexpected response shape, bad status, bad callback
    Protocol,
    /// Provider returned an `error` field
    Server,
    /// The operation was cancelled by the caller
    Cancelled,
    /// Anything else, including crypto failures
    Failed,
}

impl ErrorKind {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Busy => "busy",
            ErrorKind::System => "system_error",
            ErrorKind::Protocol => "protocol_error",
            ErrorKind::Server => "server_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Failed => "failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failed authentication operation: the kind plus a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct AuthError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl AuthError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn busy(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, detail)
    }

    pub fn system(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, detail)
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, detail)
    }

    pub fn server(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, detail)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failed, detail)
    }
}

impl From<transport::Error> for AuthError {
    fn from(e: transport::Error) -> Self {
        match e {
            transport::Error::Http(_)
            | transport::Error::Timeout(_)
            | transport::Error::Listener(_)
            | transport::Error::Browser(_) => AuthError::system(e.to_string()),
            transport::Error::InvalidHeader(_) | transport::Error::Filter(_) => {
                AuthError::failed(e.to_string())
            }
        }
    }
}

impl From<crate::signature::CryptoError> for AuthError {
    fn from(e: crate::signature::CryptoError) -> Self {
        AuthError::failed(e.to_string())
    }
}

/// Result alias for flow operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors from the secret store and credential cache.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("not found: {0}")]
    NotFound(String),
}
