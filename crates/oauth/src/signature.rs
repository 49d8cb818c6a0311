//! HMAC-SHA1 signature engine for OAuth 1.0a

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::codec::{ParamMap, ParamMode, percent_encode, serialize};

type HmacSha1 = Hmac<Sha1>;

/// The MAC primitive rejected its key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("crypto error: {0}")]
pub struct CryptoError(pub String);

/// HMAC-SHA1 of `base` keyed by `key`, Base64 (standard alphabet, padded).
pub fn sign(base: &str, key: &str) -> Result<String, CryptoError> {
    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).map_err(|e| CryptoError(e.to_string()))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// `pe(consumer_secret)&pe(token_secret)`; the token part may be empty.
pub fn signing_key(consumer_secret: &str, token_secret: &str) -> String {
    format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    )
}

/// `METHOD&pe(base_uri)&pe(sorted params)`.
///
/// `base_uri` must already be normalized and query-less, with its query
/// parameters folded into `params`.
pub fn signature_base_string(method: &str, base_uri: &str, params: &ParamMap) -> String {
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(base_uri),
        percent_encode(&serialize(params, ParamMode::SignatureBase))
    )
}
