//! The single bearer-token lease held by a client session
//!
//! A lease is created from a [`TokenGrant`] and is immutable afterwards:
//! renewal builds a new lease and swaps it in wholesale, so the token and its
//! expiry can never be observed out of step.

use base64::Engine as _;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::client::provider::TokenGrant;
use crate::error::{ForgeError, Result};

/// Default number of seconds before expiry at which renewal is due.
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 30;

/// Longest lifetime or threshold a lease accepts; larger values are clamped.
const MAX_SECS: i64 = 10 * 365 * 24 * 3600;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(MAX_SECS).min(MAX_SECS))
}

/// Where a (possibly absent) lease stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Absent,
    /// `now < expires_at`
    Valid,
    /// `now >= expires_at`; never attached to an outbound request.
    Stale,
}

impl LeaseState {
    /// Classifies `lease` at `now`.
    pub fn of(lease: Option<&TokenLease>, now: DateTime<Utc>) -> Self {
        match lease {
            None => LeaseState::Absent,
            Some(l) if l.is_valid_at(now) => LeaseState::Valid,
            Some(_) => LeaseState::Stale,
        }
    }
}

/// An access token with its expiry and the credential needed to renew it.
#[derive(Clone)]
pub struct TokenLease {
    token: String,
    expires_at: DateTime<Utc>,
    refresh_threshold: Duration,
    refresh_token: Option<String>,
}

#[derive(serde::Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

impl TokenLease {
    /// Builds a lease from a provider grant.
    ///
    /// The expiry comes from the access token's `exp` claim; when the token
    /// is opaque the grant's `expires_in` is used instead.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Login`] when neither source yields an expiry.
    pub fn from_grant(grant: &TokenGrant, refresh_threshold_secs: u64) -> Result<Self> {
        let expires_at = jwt_expiry(&grant.access_token)
            .or_else(|| {
                grant
                    .expires_in
                    .map(|secs| grant.received_at + seconds(secs))
            })
            .ok_or_else(|| ForgeError::Login("token grant carries no expiry".to_string()))?;

        Ok(Self {
            token: grant.access_token.clone(),
            expires_at,
            refresh_threshold: seconds(refresh_threshold_secs),
            refresh_token: grant.refresh_token.clone(),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Remaining lifetime at `now`; negative once stale.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Whether the remaining lifetime at `now` is below `min_validity_secs`.
    pub fn expires_within(&self, now: DateTime<Utc>, min_validity_secs: u64) -> bool {
        self.remaining_at(now) < seconds(min_validity_secs)
    }

    /// Whether the lease has entered its own refresh window at `now`.
    pub fn renewal_due_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_at(now) < self.refresh_threshold
    }
}

impl std::fmt::Debug for TokenLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLease")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("renewable", &self.refresh_token.is_some())
            .finish()
    }
}

/// Reads `exp` from a compact JWS without verifying it.
///
/// The client only needs the expiry to schedule renewal; the gateway is the
/// party that verifies signatures.
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claim.exp?, 0).single()
}
