//! Protocol constants and defaults

use std::time::Duration;

/// A token this close to `valid_until` is treated as expired.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Largest `expires_in` accepted from a token endpoint (ten years).
pub const MAX_EXPIRES_IN: i64 = 10 * 365 * 24 * 60 * 60;

/// Length of the random alphanumeric `oauth_nonce`.
pub const NONCE_LEN: usize = 32;

pub const OAUTH1_SIGNATURE_METHOD: &str = "HMAC-SHA1";
pub const OAUTH1_VERSION: &str = "1.0";

/// Loopback path for the OAuth1 verifier callback.
pub const OAUTH1_CALLBACK_PATH: &str = "/oauth-verified";

/// Loopback path for the OAuth2 authorization-code callback.
pub const OAUTH2_CALLBACK_PATH: &str = "/oauth2";

/// Account id the OAuth2 token triple is stored under.
pub const DEFAULT_ACCOUNT: &str = "oauth2";

/// Bound on each token/credential endpoint call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the browser round-trip (user consent + redirect).
pub const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_SUCCESS_HTML: &str = "<html><head><title>Authorization</title></head>\
<body><h1>Authorization OK</h1><p>You may close this window.</p></body></html>";

pub const DEFAULT_FAILURE_HTML: &str = "<html><head><title>Authorization</title></head>\
<body><h1>Authorization FAILED</h1><p>You may close this window and retry.</p></body></html>";
