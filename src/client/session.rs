//! Client-side token session
//!
//! [`TokenSession`] owns the one [`TokenLease`] a client holds. It is built
//! explicitly by the caller and passed by reference to whatever needs to
//! make authenticated calls; there is no global instance.
//!
//! Renewal is coalesced: the first caller that finds the lease too close to
//! expiry spawns a renewal task, later callers queue on the same owned mutex
//! and observe the lease that task installed. The generation counter tells a
//! waiter whether the lease it saw has already been replaced.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client::lease::{LeaseState, TokenLease, DEFAULT_REFRESH_THRESHOLD_SECS};
use crate::client::provider::{IdentityProvider, LoginResponse, RenewResponse};
use crate::error::{ForgeError, Result};

pub use crate::client::provider::InitMode;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Authenticated,
    Unauthenticated,
}

/// Outcome of [`TokenSession::ensure_fresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No lease is held; the caller must not call the API.
    NoLease,
    /// The lease already had enough remaining lifetime.
    Fresh,
    /// The lease was replaced by a renewal.
    Renewed,
}

struct SessionCell {
    state: SessionState,
    lease: Option<TokenLease>,
    generation: u64,
    /// Why the last renewal ended the session, if it did.
    ended: Option<String>,
}

impl SessionCell {
    fn install(&mut self, lease: TokenLease) {
        self.lease = Some(lease);
        self.state = SessionState::Authenticated;
        self.ended = None;
        self.generation += 1;
    }

    fn clear(&mut self, ended: Option<String>) {
        self.lease = None;
        self.state = SessionState::Unauthenticated;
        self.ended = ended;
        self.generation += 1;
    }

    /// Result for a waiter whose renewal was performed by someone else.
    fn settled(&self) -> Result<Freshness> {
        match (&self.lease, &self.ended) {
            (Some(_), _) => Ok(Freshness::Renewed),
            (None, Some(reason)) => Err(ForgeError::SessionEnded(reason.clone()).into()),
            (None, None) => Ok(Freshness::NoLease),
        }
    }
}

struct Shared {
    provider: Arc<dyn IdentityProvider>,
    cell: RwLock<SessionCell>,
    renewal: Arc<Mutex<()>>,
    refresh_threshold_secs: u64,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The client's bearer-token session.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use forge_gate::client::{
///     Freshness, InitMode, MemoryCredentialStore, OidcClientConfig, OidcProvider, TokenSession,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> forge_gate::Result<()> {
/// let provider = OidcProvider::new(
///     reqwest::Client::new(),
///     OidcClientConfig {
///         authority: "https://sso.example.com/realms/forge".parse()?,
///         client_id: "forge-cli".to_string(),
///         scope: "openid offline_access".to_string(),
///         redirect_port: 0,
///     },
///     Arc::new(MemoryCredentialStore::new()),
/// );
/// let session = TokenSession::new(Arc::new(provider));
/// session
///     .initialize(InitMode::Silent, &CancellationToken::new())
///     .await?;
///
/// if session.ensure_fresh(30).await? != Freshness::NoLease {
///     let request = reqwest::Client::new().get("https://api.example.com/api/me");
///     session.decorate(request).await.send().await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct TokenSession {
    shared: Arc<Shared>,
}

impl TokenSession {
    /// Creates an uninitialized session backed by `provider`.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self::with_refresh_threshold(provider, DEFAULT_REFRESH_THRESHOLD_SECS)
    }

    /// Creates a session whose leases report renewal as due
    /// `refresh_threshold_secs` before expiry.
    pub fn with_refresh_threshold(
        provider: Arc<dyn IdentityProvider>,
        refresh_threshold_secs: u64,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                cell: RwLock::new(SessionCell {
                    state: SessionState::Uninitialized,
                    lease: None,
                    generation: 0,
                    ended: None,
                }),
                renewal: Arc::new(Mutex::new(())),
                refresh_threshold_secs,
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.shared.cell.read().await.state
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state().await == SessionState::Authenticated
    }

    /// Snapshot of the current lease.
    pub async fn lease(&self) -> Option<TokenLease> {
        self.shared.cell.read().await.lease.clone()
    }

    /// Logs in through the identity provider.
    ///
    /// In [`InitMode::Silent`] every failure leaves the session
    /// unauthenticated and returns `Ok`. In [`InitMode::Interactive`] a
    /// failure is returned to the caller. Cancelling `cancel` abandons the
    /// attempt with [`ForgeError::Cancelled`] and leaves the state unchanged.
    pub async fn initialize(
        &self,
        mode: InitMode,
        cancel: &CancellationToken,
    ) -> Result<SessionState> {
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(?mode, "Session initialization cancelled");
                return Err(ForgeError::Cancelled.into());
            }
            response = self.shared.provider.login(mode) => response,
        };

        let (failure, expected): (anyhow::Error, bool) = match response {
            Ok(LoginResponse::Granted(grant)) => {
                match TokenLease::from_grant(&grant, self.shared.refresh_threshold_secs) {
                    Ok(lease) => {
                        tracing::info!(?mode, expires_at = %lease.expires_at(), "Session authenticated");
                        self.shared.cell.write().await.install(lease);
                        return Ok(SessionState::Authenticated);
                    }
                    Err(e) => (e, false),
                }
            }
            Ok(LoginResponse::NoSession) => {
                (ForgeError::Login("no existing session".to_string()).into(), true)
            }
            Ok(LoginResponse::Denied { reason }) => (ForgeError::Login(reason).into(), true),
            Err(e) => (e, false),
        };

        let mut cell = self.shared.cell.write().await;
        if cell.lease.is_none() {
            cell.state = SessionState::Unauthenticated;
        }

        match mode {
            InitMode::Silent => {
                if expected {
                    tracing::debug!(reason = %failure, "No session to resume");
                } else {
                    tracing::warn!(error = %failure, "Silent session check failed");
                }
                Ok(cell.state)
            }
            InitMode::Interactive => Err(failure),
        }
    }

    /// Makes sure the lease has at least `min_validity_secs` left.
    ///
    /// A lease that has entered its own refresh window is renewed even when
    /// `min_validity_secs` would still be met.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::SessionEnded`] when renewal fails; the lease is
    /// cleared and the user has to log in again.
    pub async fn ensure_fresh(&self, min_validity_secs: u64) -> Result<Freshness> {
        let observed = {
            let cell = self.shared.cell.read().await;
            let now = Utc::now();
            match &cell.lease {
                None => return Ok(Freshness::NoLease),
                Some(lease)
                    if !lease.renewal_due_at(now)
                        && !lease.expires_within(now, min_validity_secs) =>
                {
                    return Ok(Freshness::Fresh)
                }
                Some(_) => cell.generation,
            }
        };

        self.renew_from(observed).await
    }

    /// Renews the lease regardless of its remaining lifetime.
    ///
    /// Used after the API rejected a token the client believed valid.
    pub async fn force_renew(&self) -> Result<Freshness> {
        let observed = {
            let cell = self.shared.cell.read().await;
            if cell.lease.is_none() {
                return Ok(Freshness::NoLease);
            }
            cell.generation
        };

        self.renew_from(observed).await
    }

    async fn renew_from(&self, observed_generation: u64) -> Result<Freshness> {
        let task = tokio::spawn(renew_exclusive(
            Arc::clone(&self.shared),
            observed_generation,
        ));

        match task.await {
            Ok(result) => result,
            Err(e) => Err(ForgeError::SessionEnded(format!("renewal task failed: {e}")).into()),
        }
    }

    /// The access token, if the lease is valid right now.
    pub async fn bearer_token(&self) -> Option<String> {
        let cell = self.shared.cell.read().await;
        match (LeaseState::of(cell.lease.as_ref(), Utc::now()), &cell.lease) {
            (LeaseState::Valid, Some(lease)) => Some(lease.token().to_string()),
            _ => None,
        }
    }

    /// Attaches `Authorization: Bearer <token>` when the lease is valid.
    ///
    /// A stale or absent lease leaves the request untouched.
    pub async fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Clears the lease and ends the provider session.
    ///
    /// The local lease is gone even when the provider call fails; the error
    /// is still returned so the caller can report it.
    pub async fn logout(&self) -> Result<()> {
        let refresh_token = {
            let mut cell = self.shared.cell.write().await;
            let refresh_token = cell
                .lease
                .as_ref()
                .and_then(|lease| lease.refresh_token().map(str::to_string));
            cell.clear(None);
            refresh_token
        };

        tracing::info!("Session logged out");
        self.shared
            .provider
            .end_session(refresh_token.as_deref())
            .await
    }
}

// ---------------------------------------------------------------------------
// Renewal
// ---------------------------------------------------------------------------

/// Performs one renewal under the session's renewal mutex.
async fn renew_exclusive(shared: Arc<Shared>, observed_generation: u64) -> Result<Freshness> {
    let _guard = Arc::clone(&shared.renewal).lock_owned().await;

    let refresh_token = {
        let cell = shared.cell.read().await;
        if cell.generation != observed_generation {
            return cell.settled();
        }
        match &cell.lease {
            None => return Ok(Freshness::NoLease),
            Some(lease) => lease.refresh_token().map(str::to_string),
        }
    };

    let outcome = match refresh_token {
        None => Err("lease has no refresh credential".to_string()),
        Some(refresh_token) => match shared.provider.renew(&refresh_token).await {
            Ok(RenewResponse::Renewed(grant)) => {
                TokenLease::from_grant(&grant, shared.refresh_threshold_secs)
                    .map_err(|e| e.to_string())
            }
            Ok(RenewResponse::Rejected { reason }) => Err(reason),
            Err(e) => Err(format!("renewal failed: {e}")),
        },
    };

    let mut cell = shared.cell.write().await;
    if cell.generation != observed_generation {
        // Logged out or re-initialized while the provider was answering.
        return cell.settled();
    }

    match outcome {
        Ok(lease) => {
            tracing::info!(expires_at = %lease.expires_at(), "Token renewed");
            cell.install(lease);
            Ok(Freshness::Renewed)
        }
        Err(reason) => {
            tracing::warn!(reason = %reason, "Token renewal failed, session ended");
            cell.clear(Some(reason.clone()));
            Err(ForgeError::SessionEnded(reason).into())
        }
    }
}
