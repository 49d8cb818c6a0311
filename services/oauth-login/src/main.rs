//! OAuth login client
//!
//! Single-binary service that:
//! 1. Loads provider settings from TOML
//! 2. Resumes an OAuth2 session from the credential store, or runs the
//!    browser handshake (OAuth2 authorization code or OAuth1 three-legged)
//! 3. Installs the signing filter into the HTTP pipeline
//! 4. Optionally probes a protected resource through that pipeline, keeping
//!    tokens refreshed and persisted while it runs

mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use oauth::{
    CredentialCache, FileSecretStore, OAuth1Flow, OAuth2Flow, authenticate_oauth2,
    authorize_oauth1, spawn_token_persister,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{BrowserLauncher, HttpBackend, HttpClient, HttpRequest, ReqwestBackend, SystemBrowser};

use crate::config::{Config, OAuth1Config, OAuth2Config, ProbeConfig};

/// Upper bound on waiting for the persister's last save at shutdown.
const PERSIST_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth-login");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        flow = if config.oauth2.is_some() { "oauth2" } else { "oauth1" },
        store = %config.store.path.display(),
        timeout_secs = config.http.timeout_secs,
        "configuration loaded"
    );

    if let Some(metrics_config) = &config.metrics {
        let listener = TcpListener::bind(metrics_config.listen_addr)
            .await
            .with_context(|| format!("failed to bind to {}", metrics_config.listen_addr))?;
        serve_metrics(listener, prometheus);
    }

    let timeout = config.request_timeout();
    let http = reqwest::Client::builder()
        .user_agent(config.http.user_agent.as_str())
        .build()
        .context("failed to build HTTP client")?;
    let backend: Arc<dyn HttpBackend> = Arc::new(ReqwestBackend::new(http, timeout));
    let browser: Arc<dyn BrowserLauncher> = Arc::new(SystemBrowser);
    let client = HttpClient::new(backend.clone(), timeout);

    let persister = match (&config.oauth2, &config.oauth1) {
        (Some(oauth2), None) => {
            Some(start_oauth2(&config, oauth2, backend, browser, &client).await?)
        }
        (None, Some(oauth1)) => {
            start_oauth1(&config, oauth1, backend, browser, &client).await?;
            None
        }
        _ => anyhow::bail!("exactly one of [oauth1] or [oauth2] must be configured"),
    };

    let probed = match &config.probe {
        Some(probe) => run_probe(&client, probe).await,
        None => Ok(()),
    };

    // The pipeline's filter holds the last flow reference; dropping it ends
    // the persister once any in-flight save has landed.
    drop(client);
    if let Some(persister) = persister {
        match tokio::time::timeout(PERSIST_DRAIN_TIMEOUT, persister).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "token persister task panicked"),
            Err(_) => warn!(
                timeout_secs = PERSIST_DRAIN_TIMEOUT.as_secs(),
                "token persister still running at shutdown"
            ),
        }
    }
    probed?;

    info!("shutdown complete");
    Ok(())
}

/// Resume or log in, then keep the credential store current. Returns the
/// persister task.
async fn start_oauth2(
    config: &Config,
    oauth2: &OAuth2Config,
    backend: Arc<dyn HttpBackend>,
    browser: Arc<dyn BrowserLauncher>,
    client: &HttpClient,
) -> Result<JoinHandle<()>> {
    let flow = Arc::new(OAuth2Flow::new(
        oauth2.settings(&config.pages, config.request_timeout()),
        backend,
        browser,
    ));
    let store = FileSecretStore::open(config.store.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open credential store {}",
                config.store.path.display()
            )
        })?;
    let cache = CredentialCache::new(Arc::new(store));
    let account = config.store.account.as_str();

    authenticate_oauth2(&flow, &cache, account, client)
        .await
        .context("OAuth2 authentication failed")?;
    let persister = spawn_token_persister(&flow, cache, account.to_string());

    info!(
        account,
        valid_until = flow.tokens().valid_until,
        "OAuth2 session ready"
    );
    Ok(persister)
}

async fn start_oauth1(
    config: &Config,
    oauth1: &OAuth1Config,
    backend: Arc<dyn HttpBackend>,
    browser: Arc<dyn BrowserLauncher>,
    client: &HttpClient,
) -> Result<()> {
    let consumer_secret = oauth1
        .consumer_secret
        .clone()
        .context("[oauth1] consumer secret was not resolved")?;
    let flow = OAuth1Flow::new(
        oauth1.settings(&config.pages, config.request_timeout()),
        backend,
        browser,
    );

    authorize_oauth1(&flow, &oauth1.consumer_key, consumer_secret, client)
        .await
        .context("OAuth1 authorization failed")?;

    info!(consumer_key = %oauth1.consumer_key, "OAuth1 session ready");
    Ok(())
}

/// Send the probe once, or every `interval_secs` until SIGINT/SIGTERM.
async fn run_probe(client: &HttpClient, probe: &ProbeConfig) -> Result<()> {
    let Some(interval_secs) = probe.interval_secs else {
        let status = probe_once(client, &probe.url).await?;
        if !(200..300).contains(&status) {
            anyhow::bail!("probe {} returned HTTP {status}", probe.url);
        }
        return Ok(());
    };

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = interval.tick() => {
                if let Err(e) = probe_once(client, &probe.url).await {
                    warn!(url = %probe.url, error = %e, "probe failed");
                }
            }
        }
    }
}

async fn probe_once(client: &HttpClient, url: &str) -> Result<u16> {
    let reply = client
        .execute(HttpRequest::get(url))
        .await
        .with_context(|| format!("probe request to {url} failed"))?;
    if (200..300).contains(&reply.status) {
        info!(url, status = reply.status, "probe succeeded");
    } else {
        warn!(url, status = reply.status, "probe rejected");
    }
    Ok(reply.status)
}

fn build_metrics_router(prometheus: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus)
}

/// Serve `/metrics` on `listener` for the lifetime of the process.
fn serve_metrics(listener: TcpListener, prometheus: PrometheusHandle) {
    let addr = listener.local_addr().ok();
    let app = build_metrics_router(prometheus);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "metrics listener failed");
        }
    });
    if let Some(addr) = addr {
        info!(%addr, "metrics listener ready");
    }
}

/// Prometheus metrics endpoint. Returns metrics in text exposition format.
async fn metrics_handler(State(prometheus): State<PrometheusHandle>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
