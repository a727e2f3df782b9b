//! PKCE S256 challenge generation (RFC 7636)
//!
//! The interactive login sends `code_challenge = BASE64URL(SHA256(verifier))`
//! with the authorization request and the plain verifier with the code
//! exchange, binding the two requests to the same client instance.

use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::client::discovery::ProviderMetadata;
use crate::error::{ForgeError, Result};

/// A verifier/challenge pair for one authorization attempt.
#[derive(Clone)]
pub struct PkcePair {
    /// Secret kept by the client until the code exchange.
    pub verifier: String,
    /// Derived value sent in the authorization request.
    pub challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    /// Challenge method sent alongside [`PkcePair::challenge`].
    pub const METHOD: &'static str = "S256";

    /// Generates a fresh pair from 32 random bytes.
    pub fn generate() -> Self {
        use rand::RngCore as _;

        let mut random_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut random_bytes);

        let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
        let challenge = challenge_for(&verifier);

        Self {
            verifier,
            challenge,
        }
    }
}

/// Computes the S256 challenge for `verifier`.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Checks that the provider accepts S256 challenges.
///
/// OIDC discovery does not require `code_challenge_methods_supported`, so a
/// provider that omits it is given the benefit of the doubt. A provider that
/// lists methods without `S256` is refused.
///
/// # Errors
///
/// Returns [`ForgeError::Login`] when `S256` is explicitly unsupported.
pub fn verify_s256_support(metadata: &ProviderMetadata) -> Result<()> {
    match metadata.code_challenge_methods_supported.as_deref() {
        None => {
            tracing::debug!("Provider does not advertise PKCE methods; assuming S256");
            Ok(())
        }
        Some(methods) if methods.iter().any(|m| m == PkcePair::METHOD) => Ok(()),
        Some(_) => {
            Err(ForgeError::Login("identity provider does not support PKCE S256".to_string()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn metadata(methods: Option<Vec<&str>>) -> ProviderMetadata {
        ProviderMetadata {
            issuer: "https://sso.example.com".to_string(),
            authorization_endpoint: "https://sso.example.com/auth".to_string(),
            token_endpoint: "https://sso.example.com/token".to_string(),
            jwks_uri: "https://sso.example.com/certs".to_string(),
            end_session_endpoint: None,
            code_challenge_methods_supported: methods
                .map(|m| m.into_iter().map(str::to_string).collect()),
            id_token_signing_alg_values_supported: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn test_verifier_is_43_url_safe_chars() {
        let pair = PkcePair::generate();
        assert_eq!(pair.verifier.len(), 43);
        assert!(pair
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_challenge_matches_rfc_7636_appendix_b() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_pairs_are_unique() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn test_debug_redacts_verifier() {
        let pair = PkcePair::generate();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&pair.verifier));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_s256_support_checks() {
        assert!(verify_s256_support(&metadata(Some(vec!["plain", "S256"]))).is_ok());
        assert!(verify_s256_support(&metadata(None)).is_ok());
        assert!(verify_s256_support(&metadata(Some(vec!["plain"]))).is_err());
    }
}
