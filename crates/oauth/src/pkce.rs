//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! Optional for the OAuth2 flow. When enabled, the authorization request
//! carries the S256 challenge and the code exchange carries the verifier.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Generate a random code verifier.
///
/// 64 random bytes as URL-safe base64 without padding: 86 characters,
/// inside the 43-128 range RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
