//! OAuth 1.0a request signing
//!
//! Computes the `Authorization: OAuth ...` header for a request from the
//! consumer credentials and (once issued) the token credentials. Pure CPU;
//! no network I/O.

use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};

use common::Secret;
use rand::RngExt;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, trace};
use transport::{HttpRequest, RequestFilter};

use crate::codec::{ParamMap, ParamMode, normalize_uri, parse_query, serialize};
use crate::constants::{NONCE_LEN, OAUTH1_SIGNATURE_METHOD, OAUTH1_VERSION};
use crate::credentials::unix_now;
use crate::signature::{CryptoError, sign, signature_base_string, signing_key};
use crate::telemetry;

const NONCE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Consumer and token credentials used for signing.
#[derive(Debug, Clone, Default)]
pub struct OAuth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: Secret<String>,
    /// Temporary request token during the handshake, then the access token
    pub token_key: String,
    pub token_secret: Secret<String>,
}

impl OAuth1Credentials {
    fn can_sign(&self) -> bool {
        !self.consumer_key.is_empty() && !self.consumer_secret.is_empty()
    }
}

/// Signs outgoing requests with OAuth 1.0a HMAC-SHA1.
#[derive(Debug, Default)]
pub struct OAuth1Filter {
    credentials: RwLock<OAuth1Credentials>,
}

impl OAuth1Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_consumer(&self, key: &str, secret: Secret<String>) {
        let mut creds = self.write();
        creds.consumer_key = key.to_string();
        creds.consumer_secret = secret;
    }

    pub fn set_token(&self, key: &str, secret: Secret<String>) {
        let mut creds = self.write();
        creds.token_key = key.to_string();
        creds.token_secret = secret;
    }

    pub fn credentials(&self) -> OAuth1Credentials {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, OAuth1Credentials> {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Header value for `method uri` with a fresh nonce and timestamp.
    pub fn authorization_header(
        &self,
        method: &str,
        uri: &str,
        extra: &ParamMap,
    ) -> Result<String, CryptoError> {
        self.authorization_header_with(method, uri, extra, &generate_nonce(), unix_now())
    }

    /// Header value with a caller-supplied nonce and timestamp.
    pub fn authorization_header_with(
        &self,
        method: &str,
        uri: &str,
        extra: &ParamMap,
        nonce: &str,
        timestamp: i64,
    ) -> Result<String, CryptoError> {
        let creds = self.credentials();

        let mut params = extra.clone();
        params.insert("oauth_consumer_key".into(), creds.consumer_key.clone());
        params.insert(
            "oauth_signature_method".into(),
            OAUTH1_SIGNATURE_METHOD.into(),
        );
        params.insert("oauth_timestamp".into(), timestamp.to_string());
        params.insert("oauth_nonce".into(), nonce.to_string());
        params.insert("oauth_version".into(), OAUTH1_VERSION.into());
        if !creds.token_key.is_empty() {
            params.insert("oauth_token".into(), creds.token_key.clone());
        }

        let (base_uri, query) = normalize_uri(uri);
        params.extend(query);

        let base = signature_base_string(method, &base_uri, &params);
        trace!(base = %base, "oauth1 signature base string");
        let key = signing_key(
            creds.consumer_secret.expose(),
            creds.token_secret.expose(),
        );
        params.insert("oauth_signature".into(), sign(&base, &key)?);

        Ok(format!("OAuth {}", serialize(&params, ParamMode::Header)))
    }

    /// Sign `request` in place. Form bodies contribute their parameters.
    ///
    /// Requests pass through untouched while no consumer credentials are set.
    pub fn sign_request(
        &self,
        request: &mut HttpRequest,
        extra: &ParamMap,
    ) -> transport::Result<()> {
        if !self.credentials().can_sign() {
            debug!("oauth1 consumer credentials not set, request left unsigned");
            return Ok(());
        }

        let mut params = extra.clone();
        if request.content_type.as_deref() == Some(transport::FORM_CONTENT_TYPE) {
            params.extend(parse_query(&request.body));
        }

        let header = self
            .authorization_header(request.method.as_str(), &request.uri, &params)
            .map_err(|e| transport::Error::Filter(e.to_string()))?;
        request.set_header(AUTHORIZATION, &header)?;
        telemetry::record_signed("oauth1");
        Ok(())
    }
}

impl RequestFilter for OAuth1Filter {
    fn id(&self) -> &str {
        "oauth1"
    }

    fn filter(
        &self,
        mut request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<HttpRequest>> + Send + '_>> {
        Box::pin(async move {
            self.sign_request(&mut request, &ParamMap::new())?;
            Ok(request)
        })
    }
}

/// Random `[A-Za-z0-9]` string of `NONCE_LEN` characters.
pub fn generate_nonce() -> String {
    let mut rng = rand::rng();
    (0..NONCE_LEN)
        .map(|_| NONCE_CHARSET[rng.random_range(0..NONCE_CHARSET.len())] as char)
        .collect()
}
