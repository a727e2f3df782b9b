//! Bearer-token validation
//!
//! A token is accepted only if all of these hold:
//!
//! 1. its signature verifies against one of the issuer's signing keys;
//! 2. `iss` equals the configured authority;
//! 3. `aud` contains the configured audience;
//! 4. the current time lies within `nbf`/`exp`, give or take the leeway.
//!
//! Only asymmetric algorithms are accepted. Every failure maps to a
//! [`Rejection`] with a stable reason code for logs; callers answer all of
//! them with the same 401.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};

use crate::config::AuthConfig;
use crate::gateway::context::AuthorizationContext;
use crate::gateway::jwks::{KeyError, SigningKeyCache};

// ---------------------------------------------------------------------------
// Algorithms and rejections
// ---------------------------------------------------------------------------

const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Which check a token failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingToken,
    Malformed,
    UnsupportedAlgorithm,
    UnknownKey,
    BadSignature,
    WrongIssuer,
    WrongAudience,
    Expired,
    NotYetValid,
    MissingClaim,
}

impl Rejection {
    /// Stable identifier for logs.
    pub fn code(self) -> &'static str {
        match self {
            Rejection::MissingToken => "missing_token",
            Rejection::Malformed => "malformed",
            Rejection::UnsupportedAlgorithm => "unsupported_alg",
            Rejection::UnknownKey => "unknown_kid",
            Rejection::BadSignature => "bad_signature",
            Rejection::WrongIssuer => "bad_issuer",
            Rejection::WrongAudience => "bad_audience",
            Rejection::Expired => "expired",
            Rejection::NotYetValid => "not_yet_valid",
            Rejection::MissingClaim => "missing_claim",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of a failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The token is not acceptable.
    #[error("token rejected: {0}")]
    Rejected(Rejection),

    /// Signing keys could not be loaded, so nothing can be verified.
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

impl From<Rejection> for ValidationError {
    fn from(rejection: Rejection) -> Self {
        ValidationError::Rejected(rejection)
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// What a valid token must carry.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub issuer: String,
    pub audience: String,
    pub leeway_secs: u64,
    /// Claim used as the context subject.
    pub name_claim: String,
}

impl ValidatorConfig {
    pub fn from_auth(auth: &AuthConfig) -> Self {
        Self {
            issuer: auth.authority.clone(),
            audience: auth.audience.clone(),
            leeway_secs: auth.leeway_seconds,
            name_claim: auth.name_claim.clone(),
        }
    }
}

/// Verifies bearer tokens against the issuer's keys.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use forge_gate::gateway::jwks::{KeySource, SigningKeyCache, SigningKeyCacheConfig};
/// use forge_gate::gateway::validator::{TokenValidator, ValidatorConfig};
///
/// # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let authority = "https://sso.example.com/realms/forge";
/// let keys = SigningKeyCache::new(
///     KeySource::Discovery {
///         authority: authority.parse()?,
///     },
///     SigningKeyCacheConfig::default(),
/// )?;
/// let validator = TokenValidator::new(
///     Arc::new(keys),
///     ValidatorConfig {
///         issuer: authority.to_string(),
///         audience: "forge-api".to_string(),
///         leeway_secs: 30,
///         name_claim: "preferred_username".to_string(),
///     },
/// );
///
/// let context = validator.validate(token).await?;
/// println!("request from {}", context.subject());
/// # Ok(())
/// # }
/// ```
pub struct TokenValidator {
    keys: Arc<SigningKeyCache>,
    config: ValidatorConfig,
}

impl TokenValidator {
    pub fn new(keys: Arc<SigningKeyCache>, config: ValidatorConfig) -> Self {
        Self { keys, config }
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let issuer = self.config.issuer.trim_end_matches('/');
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer.to_string(), format!("{issuer}/")]);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = self.config.leeway_secs;
        validation
    }

    /// Validates `token` and derives the caller's context.
    pub async fn validate(&self, token: &str) -> Result<AuthorizationContext, ValidationError> {
        if token.is_empty() {
            return Err(Rejection::MissingToken.into());
        }

        let header = decode_header(token).map_err(|_| Rejection::Malformed)?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(Rejection::UnsupportedAlgorithm.into());
        }

        let keys = self
            .keys
            .keys_for(header.kid.as_deref())
            .await
            .map_err(|e| match e {
                KeyError::UnknownKey(_) => ValidationError::Rejected(Rejection::UnknownKey),
                other => ValidationError::KeysUnavailable(other.to_string()),
            })?;

        let validation = self.validation(header.alg);
        let mut last = Rejection::BadSignature;

        for key in keys {
            if !key.supports(header.alg) {
                last = Rejection::UnsupportedAlgorithm;
                continue;
            }

            match decode::<Map<String, Value>>(token, &key.key, &validation) {
                Ok(data) => {
                    return Ok(AuthorizationContext::from_claims(
                        &data.claims,
                        &self.config.name_claim,
                    ))
                }
                // Wrong key for this token: try the next one.
                Err(e) if is_key_mismatch(&e) => {
                    last = Rejection::BadSignature;
                }
                Err(e) => return Err(map_jwt_error(&e).into()),
            }
        }

        Err(last.into())
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn is_key_mismatch(error: &jsonwebtoken::errors::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
    )
}

fn map_jwt_error(error: &jsonwebtoken::errors::Error) -> Rejection {
    match error.kind() {
        ErrorKind::InvalidSignature => Rejection::BadSignature,
        ErrorKind::ExpiredSignature => Rejection::Expired,
        ErrorKind::ImmatureSignature => Rejection::NotYetValid,
        ErrorKind::InvalidIssuer => Rejection::WrongIssuer,
        ErrorKind::InvalidAudience => Rejection::WrongAudience,
        ErrorKind::InvalidAlgorithm => Rejection::UnsupportedAlgorithm,
        ErrorKind::MissingRequiredClaim(_) => Rejection::MissingClaim,
        _ => Rejection::Malformed,
    }
}
