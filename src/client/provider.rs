//! Identity-provider protocol seen by the token session
//!
//! Login and renewal are structured request/response exchanges: the provider
//! answers with an explicit variant instead of signalling through callbacks,
//! so the session can apply its state machine with a single `match`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// How [`IdentityProvider::login`] should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Send the user through the provider's login page if needed.
    Interactive,
    /// Only resume an existing session; never prompt.
    Silent,
}

/// Tokens issued by the provider at login or renewal.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds as reported by the token endpoint.
    pub expires_in: Option<u64>,
    /// When the grant was received; anchors `expires_in`.
    pub received_at: DateTime<Utc>,
}

impl TokenGrant {
    /// Creates a grant received now.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .field("received_at", &self.received_at)
            .finish()
    }
}

/// Answer to a login request.
#[derive(Debug, Clone)]
pub enum LoginResponse {
    /// The user is authenticated.
    Granted(TokenGrant),
    /// No resumable session exists (silent mode only).
    NoSession,
    /// The provider or the user refused the login.
    Denied { reason: String },
}

/// Answer to a renewal request.
#[derive(Debug, Clone)]
pub enum RenewResponse {
    Renewed(TokenGrant),
    /// The refresh credential is no longer accepted.
    Rejected { reason: String },
}

/// An OpenID Connect identity provider as seen by the client.
///
/// `Err` results are reserved for transport and protocol failures; refusals
/// are expressed through the response variants.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Obtains tokens for the user.
    async fn login(&self, mode: InitMode) -> Result<LoginResponse>;

    /// Exchanges a refresh credential for a new grant.
    async fn renew(&self, refresh_token: &str) -> Result<RenewResponse>;

    /// Forgets persisted credentials and ends the provider-side session.
    async fn end_session(&self, refresh_token: Option<&str>) -> Result<()>;
}
