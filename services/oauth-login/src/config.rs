//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Client and consumer secrets come from `OAUTH_CLIENT_SECRET` /
//! `OAUTH_CONSUMER_SECRET` or a `*_file`, never from the TOML directly.

use common::Secret;
use oauth::constants::{
    DEFAULT_ACCOUNT, DEFAULT_AUTHORIZATION_TIMEOUT, DEFAULT_FAILURE_HTML, DEFAULT_SUCCESS_HTML,
};
use oauth::{OAuth1Settings, OAuth2Settings};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CLIENT_SECRET_ENV: &str = "OAUTH_CLIENT_SECRET";
pub const CONSUMER_SECRET_ENV: &str = "OAUTH_CONSUMER_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub oauth1: Option<OAuth1Config>,
    #[serde(default)]
    pub oauth2: Option<OAuth2Config>,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

/// Outbound HTTP settings shared by the flows and the probe
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Where OAuth2 tokens are cached between runs
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_account")]
    pub account: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuth2Config {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to OAUTH_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub use_pkce: bool,
    #[serde(default = "default_authorization_timeout")]
    pub authorization_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct OAuth1Config {
    pub consumer_key: String,
    #[serde(skip)]
    pub consumer_secret: Option<Secret<String>>,
    /// Path to a file containing the consumer secret (alternative to OAUTH_CONSUMER_SECRET)
    #[serde(default)]
    pub consumer_secret_file: Option<PathBuf>,
    pub temporary_request_uri: String,
    pub authorize_uri: String,
    pub token_request_uri: String,
    #[serde(default)]
    pub require_callback_confirmed: bool,
    #[serde(default = "default_authorization_timeout")]
    pub authorization_timeout_secs: u64,
}

/// HTML served to the browser after the provider redirects back
#[derive(Debug, Deserialize)]
pub struct PagesConfig {
    #[serde(default = "default_success_html")]
    pub success_html: String,
    #[serde(default = "default_failure_html")]
    pub failure_html: String,
}

/// Prometheus exposition listener
#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub listen_addr: SocketAddr,
}

/// Request sent through the authenticated pipeline once the session is up.
/// With `interval_secs` the probe repeats until shutdown, which keeps the
/// refresh path exercised.
#[derive(Debug, Deserialize)]
pub struct ProbeConfig {
    pub url: String,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_user_agent() -> String {
    concat!("oauth-login/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_authorization_timeout() -> u64 {
    DEFAULT_AUTHORIZATION_TIMEOUT.as_secs()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("oauth-credentials.json")
}

fn default_account() -> String {
    DEFAULT_ACCOUNT.to_string()
}

fn default_success_html() -> String {
    DEFAULT_SUCCESS_HTML.to_string()
}

fn default_failure_html() -> String {
    DEFAULT_FAILURE_HTML.to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            account: default_account(),
        }
    }
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            success_html: default_success_html(),
            failure_html: default_failure_html(),
        }
    }
}

fn require_http(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )))
    }
}

fn require_nonzero(field: &str, value: u64) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

/// Env var wins; otherwise read `file`. Whitespace-only content yields None.
fn resolve_secret(env: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env) {
        return Ok(Some(Secret::new(value)));
    }
    let Some(file) = file else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!("failed to read {}: {e}", file.display()))
    })?;
    let value = contents.trim().to_owned();
    Ok((!value.is_empty()).then(|| Secret::new(value)))
}

impl Config {
    /// Load configuration from a TOML file, validate it, then resolve secrets.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Some(oauth2) = config.oauth2.as_mut() {
            oauth2.client_secret =
                resolve_secret(CLIENT_SECRET_ENV, oauth2.client_secret_file.as_deref())?;
        }
        if let Some(oauth1) = config.oauth1.as_mut() {
            oauth1.consumer_secret =
                resolve_secret(CONSUMER_SECRET_ENV, oauth1.consumer_secret_file.as_deref())?;
            if oauth1.consumer_secret.is_none() {
                return Err(common::Error::Config(format!(
                    "[oauth1] needs a consumer secret: set {CONSUMER_SECRET_ENV} or consumer_secret_file"
                )));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        require_nonzero("http.timeout_secs", self.http.timeout_secs)?;

        match (&self.oauth1, &self.oauth2) {
            (Some(oauth1), None) => {
                require_http("oauth1.temporary_request_uri", &oauth1.temporary_request_uri)?;
                require_http("oauth1.authorize_uri", &oauth1.authorize_uri)?;
                require_http("oauth1.token_request_uri", &oauth1.token_request_uri)?;
                require_nonzero(
                    "oauth1.authorization_timeout_secs",
                    oauth1.authorization_timeout_secs,
                )?;
            }
            (None, Some(oauth2)) => {
                require_http("oauth2.auth_endpoint", &oauth2.auth_endpoint)?;
                require_http("oauth2.token_endpoint", &oauth2.token_endpoint)?;
                require_nonzero(
                    "oauth2.authorization_timeout_secs",
                    oauth2.authorization_timeout_secs,
                )?;
            }
            _ => {
                return Err(common::Error::Config(
                    "exactly one of [oauth1] or [oauth2] must be configured".into(),
                ));
            }
        }

        if let Some(probe) = &self.probe {
            require_http("probe.url", &probe.url)?;
            if let Some(interval) = probe.interval_secs {
                require_nonzero("probe.interval_secs", interval)?;
            }
        }
        if self.store.account.is_empty() {
            return Err(common::Error::Config("store.account must not be empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-login.toml")
    }
}

impl OAuth2Config {
    /// Flow settings. A missing client secret is sent as empty, which public
    /// clients using PKCE rely on.
    pub fn settings(&self, pages: &PagesConfig, request_timeout: Duration) -> OAuth2Settings {
        let mut settings = OAuth2Settings::new(
            self.client_id.clone(),
            self.client_secret.clone().unwrap_or_default(),
            self.auth_endpoint.clone(),
            self.token_endpoint.clone(),
            self.scope.clone(),
        );
        settings.use_pkce = self.use_pkce;
        settings.success_html = pages.success_html.clone();
        settings.failure_html = pages.failure_html.clone();
        settings.request_timeout = request_timeout;
        settings.authorization_timeout = Duration::from_secs(self.authorization_timeout_secs);
        settings
    }
}

impl OAuth1Config {
    pub fn settings(&self, pages: &PagesConfig, request_timeout: Duration) -> OAuth1Settings {
        let mut settings = OAuth1Settings::new(
            self.temporary_request_uri.clone(),
            self.authorize_uri.clone(),
            self.token_request_uri.clone(),
        );
        settings.require_callback_confirmed = self.require_callback_confirmed;
        settings.success_html = pages.success_html.clone();
        settings.failure_html = pages.failure_html.clone();
        settings.request_timeout = request_timeout;
        settings.authorization_timeout = Duration::from_secs(self.authorization_timeout_secs);
        settings
    }
}
