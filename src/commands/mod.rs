//! Command handlers for the CLI
//!
//! - `auth` - login, logout and session status
//! - `api` - calls against the gateway through the token session
//!
//! Each handler builds its own [`TokenSession`] and resumes any stored
//! session silently before doing its work; nothing is shared between
//! invocations except the refresh credential in the OS keyring.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::credentials::KeyringCredentialStore;
use crate::client::oidc::{OidcClientConfig, OidcProvider};
use crate::client::session::{InitMode, SessionState, TokenSession};
use crate::config::Config;
use crate::error::Result;

pub mod api;
pub mod auth;

/// Builds a session backed by the configured identity provider.
pub fn build_session(config: &Config) -> Result<TokenSession> {
    config.validate_client()?;

    let provider = OidcProvider::new(
        reqwest::Client::new(),
        OidcClientConfig::from_config(config)?,
        Arc::new(KeyringCredentialStore::default()),
    );

    Ok(TokenSession::with_refresh_threshold(
        Arc::new(provider),
        config.client.min_validity_seconds,
    ))
}

/// Builds a session and silently resumes a stored login, if any.
pub async fn resume_session(config: &Config) -> Result<(TokenSession, SessionState)> {
    let session = build_session(config)?;
    let state = session
        .initialize(InitMode::Silent, &CancellationToken::new())
        .await?;
    Ok((session, state))
}

/// A cancellation token tripped by Ctrl-C.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}
