//! OpenID Connect implementation of [`IdentityProvider`]
//!
//! Interactive login runs the authorization code flow with PKCE S256 against
//! a loopback redirect listener. Silent login resumes a session from the
//! refresh credential kept in the [`CredentialStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use url::Url;

use crate::client::credentials::{credential_key, CredentialStore};
use crate::client::discovery::{fetch_provider_metadata, ProviderMetadata};
use crate::client::pkce::{self, PkcePair};
use crate::client::provider::{
    IdentityProvider, InitMode, LoginResponse, RenewResponse, TokenGrant,
};
use crate::config::Config;
use crate::error::{ForgeError, Result};

/// How long the interactive flow waits for the browser redirect.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Called with the authorization URL when user interaction is needed.
pub type BrowserLauncher = Arc<dyn Fn(&Url) + Send + Sync>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Client registration at the identity provider.
#[derive(Debug, Clone)]
pub struct OidcClientConfig {
    pub authority: Url,
    pub client_id: String,
    pub scope: String,
    /// Loopback port for the redirect listener; `0` picks a free port.
    pub redirect_port: u16,
}

impl OidcClientConfig {
    /// Extracts the client registration from the application config.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Config`] when the authority is not a URL.
    pub fn from_config(config: &Config) -> Result<Self> {
        let authority = Url::parse(&config.auth.authority).map_err(|e| {
            ForgeError::Config(format!("invalid authority '{}': {e}", config.auth.authority))
        })?;

        Ok(Self {
            authority,
            client_id: config.client.client_id.clone(),
            scope: config.client.scope.clone(),
            redirect_port: config.client.redirect_port,
        })
    }

    fn credential_key(&self) -> String {
        credential_key(&self.client_id, self.authority.as_str())
    }
}

// ---------------------------------------------------------------------------
// Token endpoint wire types
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_grant(self) -> TokenGrant {
        TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorBody {
    fn describe(&self) -> String {
        match (&self.error, &self.error_description) {
            (Some(code), Some(desc)) => format!("{code}: {desc}"),
            (Some(code), None) => code.clone(),
            (None, Some(desc)) => desc.clone(),
            (None, None) => "token endpoint refused the request".to_string(),
        }
    }
}

enum TokenOutcome {
    Granted(TokenGrant),
    Rejected(String),
}

/// What the browser brought back to the redirect listener.
#[derive(Debug, PartialEq, Eq)]
enum CallbackOutcome {
    Code(String),
    Error(String),
}

// ---------------------------------------------------------------------------
// OidcProvider
// ---------------------------------------------------------------------------

/// OpenID Connect identity provider client.
pub struct OidcProvider {
    http: reqwest::Client,
    config: OidcClientConfig,
    store: Arc<dyn CredentialStore>,
    metadata: OnceCell<ProviderMetadata>,
    launcher: BrowserLauncher,
}

impl OidcProvider {
    /// Creates a provider client that opens the system browser for logins.
    pub fn new(
        http: reqwest::Client,
        config: OidcClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            http,
            config,
            store,
            metadata: OnceCell::new(),
            launcher: Arc::new(open_in_browser),
        }
    }

    /// Replaces the browser launcher, e.g. to drive the redirect in tests.
    pub fn with_launcher(mut self, launcher: BrowserLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Returns the discovered provider metadata, fetching it on first use.
    pub async fn metadata(&self) -> Result<&ProviderMetadata> {
        self.metadata
            .get_or_try_init(|| fetch_provider_metadata(&self.http, &self.config.authority))
            .await
    }

    async fn interactive_login(&self) -> Result<LoginResponse> {
        let meta = self.metadata().await?;
        pkce::verify_s256_support(meta)?;

        let pkce = PkcePair::generate();
        let state = generate_state();

        let listener = TcpListener::bind(("127.0.0.1", self.config.redirect_port))
            .await
            .map_err(|e| ForgeError::Login(format!("failed to bind redirect listener: {e}")))?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");

        let auth_url = build_authorization_url(
            meta,
            &self.config,
            &redirect_uri,
            &state,
            &pkce.challenge,
        )?;
        (self.launcher)(&auth_url);

        let outcome = tokio::time::timeout(LOGIN_TIMEOUT, accept_callback(&listener, &state))
            .await
            .map_err(|_| ForgeError::Login("timed out waiting for the login redirect".to_string()))??;

        let code = match outcome {
            CallbackOutcome::Code(code) => code,
            CallbackOutcome::Error(reason) => return Ok(LoginResponse::Denied { reason }),
        };

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ];

        match self.token_request(meta, &params).await? {
            TokenOutcome::Granted(grant) => {
                self.persist(&grant);
                tracing::info!("Interactive login completed");
                Ok(LoginResponse::Granted(grant))
            }
            TokenOutcome::Rejected(reason) => Err(ForgeError::Login(reason).into()),
        }
    }

    async fn silent_login(&self) -> Result<LoginResponse> {
        let Some(refresh_token) = self.store.load(&self.config.credential_key())? else {
            tracing::debug!("No stored credential to resume");
            return Ok(LoginResponse::NoSession);
        };

        match self.renew(&refresh_token).await? {
            RenewResponse::Renewed(grant) => Ok(LoginResponse::Granted(grant)),
            RenewResponse::Rejected { reason } => {
                tracing::debug!(reason = %reason, "Stored credential no longer accepted");
                Ok(LoginResponse::NoSession)
            }
        }
    }

    async fn token_request(
        &self,
        meta: &ProviderMetadata,
        params: &[(&str, &str)],
    ) -> Result<TokenOutcome> {
        let resp = self
            .http
            .post(&meta.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| ForgeError::Upstream(format!("token request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body: TokenErrorBody = resp.json().await.unwrap_or_default();
            return Ok(TokenOutcome::Rejected(body.describe()));
        }

        if !status.is_success() {
            return Err(
                ForgeError::Upstream(format!("token endpoint returned {status}")).into(),
            );
        }

        let raw: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ForgeError::Upstream(format!("failed to parse token response: {e}")))?;

        Ok(TokenOutcome::Granted(raw.into_grant()))
    }

    /// Saves the refresh credential; a failing keyring does not fail the login.
    fn persist(&self, grant: &TokenGrant) {
        if let Some(refresh_token) = &grant.refresh_token {
            if let Err(e) = self.store.save(&self.config.credential_key(), refresh_token) {
                tracing::warn!(error = %e, "Failed to persist refresh credential");
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    async fn login(&self, mode: InitMode) -> Result<LoginResponse> {
        match mode {
            InitMode::Interactive => self.interactive_login().await,
            InitMode::Silent => self.silent_login().await,
        }
    }

    async fn renew(&self, refresh_token: &str) -> Result<RenewResponse> {
        let meta = self.metadata().await?;
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];

        match self.token_request(meta, &params).await? {
            TokenOutcome::Granted(mut grant) => {
                // Providers that do not rotate keep the old credential valid.
                if grant.refresh_token.is_none() {
                    grant.refresh_token = Some(refresh_token.to_string());
                }
                self.persist(&grant);
                Ok(RenewResponse::Renewed(grant))
            }
            TokenOutcome::Rejected(reason) => {
                if let Err(e) = self.store.delete(&self.config.credential_key()) {
                    tracing::warn!(error = %e, "Failed to forget rejected credential");
                }
                Ok(RenewResponse::Rejected { reason })
            }
        }
    }

    async fn end_session(&self, refresh_token: Option<&str>) -> Result<()> {
        self.store.delete(&self.config.credential_key())?;

        let Some(refresh_token) = refresh_token else {
            return Ok(());
        };
        let meta = self.metadata().await?;
        let Some(endpoint) = meta.end_session_endpoint.as_deref() else {
            tracing::debug!("Provider has no end_session_endpoint");
            return Ok(());
        };

        let resp = self
            .http
            .post(endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| ForgeError::Upstream(format!("end-session request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(ForgeError::Upstream(format!(
                "end-session endpoint returned {}",
                resp.status()
            ))
            .into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Authorization code flow helpers
// ---------------------------------------------------------------------------

fn generate_state() -> String {
    use rand::RngCore as _;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn build_authorization_url(
    meta: &ProviderMetadata,
    config: &OidcClientConfig,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> Result<Url> {
    let mut url = Url::parse(&meta.authorization_endpoint).map_err(|e| {
        ForgeError::Upstream(format!(
            "invalid authorization endpoint '{}': {e}",
            meta.authorization_endpoint
        ))
    })?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &config.scope)
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", PkcePair::METHOD);

    Ok(url)
}

fn open_in_browser(url: &Url) {
    eprintln!("Open the following URL in your browser to log in:\n{url}");

    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url.as_str()).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open")
            .arg(url.as_str())
            .spawn();
    }
}

/// Serves the loopback listener until the browser hits `/callback`.
async fn accept_callback(listener: &TcpListener, expected_state: &str) -> Result<CallbackOutcome> {
    loop {
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| ForgeError::Login(format!("failed to accept login redirect: {e}")))?;
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        loop {
            let mut header = String::new();
            let read = reader.read_line(&mut header).await?;
            if read == 0 || header.trim_end().is_empty() {
                break;
            }
        }

        // "GET /callback?code=...&state=... HTTP/1.1"
        let target = request_line.split_whitespace().nth(1).unwrap_or("/");
        let (path, query) = target.split_once('?').unwrap_or((target, ""));

        if path != "/callback" {
            let _ = reader
                .get_mut()
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
            continue;
        }

        let outcome = parse_callback(query, expected_state);
        let body: &[u8] = match &outcome {
            Ok(CallbackOutcome::Code(_)) => {
                b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nLogin complete. You may close this tab."
            }
            _ => {
                b"HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nLogin was not completed. You may close this tab."
            }
        };
        let _ = reader.get_mut().write_all(body).await;
        return outcome;
    }
}

fn parse_callback(query: &str, expected_state: &str) -> Result<CallbackOutcome> {
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(ForgeError::Login("state mismatch in login redirect".to_string()).into());
    }

    if let Some(error) = params.get("error") {
        let reason = match params.get("error_description") {
            Some(desc) => format!("{error}: {desc}"),
            None => error.clone(),
        };
        return Ok(CallbackOutcome::Error(reason));
    }

    params
        .get("code")
        .cloned()
        .map(CallbackOutcome::Code)
        .ok_or_else(|| ForgeError::Login("authorization code missing from redirect".to_string()).into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
