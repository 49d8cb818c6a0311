//! Resume-or-login helpers wiring flows, the credential cache, and an
//! `HttpClient` together

use std::sync::Arc;

use common::Secret;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transport::HttpClient;

use crate::credentials::CredentialCache;
use crate::error::{AuthError, ErrorKind, Result};
use crate::oauth1::OAuth1Flow;
use crate::oauth2::{OAuth2Filter, OAuth2Flow, OAuth2State};

/// Authenticate an OAuth2 session for `account`.
///
/// Installs the flow's filter into `client`, resumes from cached tokens when
/// present (falling back to a browser login if the provider rejects the
/// cached refresh token), and persists the resulting tokens.
pub async fn authenticate_oauth2(
    flow: &Arc<OAuth2Flow>,
    cache: &CredentialCache,
    account: &str,
    client: &HttpClient,
) -> Result<Arc<OAuth2Filter>> {
    let filter = OAuth2Filter::new(flow.clone());
    client.add_request_filter(filter.clone());

    let cached = cache.load(account).await.unwrap_or_else(|e| {
        warn!(account, error = %e, "credential store unreadable, starting fresh login");
        None
    });

    match cached {
        Some(tokens) => {
            info!(account, "resuming from cached credentials");
            match flow.resume(tokens).await {
                Err(e) if e.kind == ErrorKind::Server => {
                    warn!(account, error = %e, "cached refresh token rejected, logging in again");
                    flow.login().await?;
                }
                other => other?,
            }
        }
        None => {
            info!(account, "no cached credentials, starting login");
            flow.login().await?;
        }
    }

    cache
        .save(account, &flow.tokens())
        .await
        .map_err(|e| AuthError::system(format!("persisting credentials: {e}")))?;
    Ok(filter)
}

/// Save the flow's tokens every time it reaches `Complete`, so refreshed
/// tokens survive a restart. Ends when the flow is dropped.
pub fn spawn_token_persister(
    flow: &Arc<OAuth2Flow>,
    cache: CredentialCache,
    account: String,
) -> JoinHandle<()> {
    let mut state = flow.subscribe();
    let flow = Arc::downgrade(flow);
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            if *state.borrow_and_update() != OAuth2State::Complete {
                continue;
            }
            let Some(flow) = flow.upgrade() else { break };
            let tokens = flow.tokens();
            drop(flow);
            match cache.save(&account, &tokens).await {
                Ok(()) => debug!(account, "persisted refreshed credentials"),
                Err(e) => warn!(account, error = %e, "failed to persist credentials"),
            }
        }
    })
}

/// Install the OAuth1 signing filter into `client` and run the handshake.
pub async fn authorize_oauth1(
    flow: &OAuth1Flow,
    consumer_key: &str,
    consumer_secret: Secret<String>,
    client: &HttpClient,
) -> Result<()> {
    client.add_request_filter(flow.filter());
    flow.authorize(consumer_key, consumer_secret).await
}
