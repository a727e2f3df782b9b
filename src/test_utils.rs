//! Test utilities for Forge Gate
//!
//! Fixed RSA key material and a token minter, shared by unit tests and the
//! integration tests under `tests/`. The keys are test fixtures and must
//! never be trusted outside of tests.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};

use crate::gateway::jwks::SigningKeyCache;

/// `kid` of the key in [`trusted_jwks`].
pub const TRUSTED_KID: &str = "trusted-key-1";

/// `kid` of the key in [`untrusted_jwks`].
pub const UNTRUSTED_KID: &str = "untrusted-key-1";

const TRUSTED_KEY_PEM: &str = include_str!("../tests/fixtures/trusted_key.pem");
const UNTRUSTED_KEY_PEM: &str = include_str!("../tests/fixtures/untrusted_key.pem");
const TRUSTED_JWKS: &str = include_str!("../tests/fixtures/trusted_jwks.json");
const UNTRUSTED_JWKS: &str = include_str!("../tests/fixtures/untrusted_jwks.json");

/// Public half of the trusted signing key.
pub fn trusted_jwks() -> JwkSet {
    serde_json::from_str(TRUSTED_JWKS).expect("trusted JWKS fixture must parse")
}

/// Public half of a key the gateway has never heard of.
pub fn untrusted_jwks() -> JwkSet {
    serde_json::from_str(UNTRUSTED_JWKS).expect("untrusted JWKS fixture must parse")
}

/// Key cache holding only the trusted key.
pub fn trusted_keys() -> SigningKeyCache {
    SigningKeyCache::from_static(trusted_jwks())
}

/// Description of a token to mint.
#[derive(Debug, Clone)]
pub struct TokenSpec {
    claims: Map<String, Value>,
    expires_in: i64,
    not_before_in: Option<i64>,
    kid: Option<String>,
    untrusted: bool,
}

impl TokenSpec {
    /// A token for subject `user-1`, valid for five minutes.
    pub fn new(issuer: &str, audience: &str) -> Self {
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(issuer));
        claims.insert("aud".to_string(), json!(audience));
        claims.insert("sub".to_string(), json!("user-1"));

        Self {
            claims,
            expires_in: 300,
            not_before_in: None,
            kid: Some(TRUSTED_KID.to_string()),
            untrusted: false,
        }
    }

    /// Sets or replaces a claim.
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Seconds from now until `exp`; negative for an expired token.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = seconds;
        self
    }

    /// Seconds from now until `nbf`.
    pub fn not_before_in(mut self, seconds: i64) -> Self {
        self.not_before_in = Some(seconds);
        self
    }

    /// Overrides the header `kid`; `None` omits it.
    pub fn kid(mut self, kid: Option<&str>) -> Self {
        self.kid = kid.map(str::to_string);
        self
    }

    /// Signs with the untrusted key (and its `kid`).
    pub fn untrusted(mut self) -> Self {
        self.untrusted = true;
        self.kid = Some(UNTRUSTED_KID.to_string());
        self
    }
}

/// Signs `spec` with RS256.
pub fn mint_token(spec: &TokenSpec) -> String {
    let now = chrono::Utc::now().timestamp();
    let mut claims = spec.claims.clone();
    claims.insert("iat".to_string(), json!(now));
    claims.insert("exp".to_string(), json!(now + spec.expires_in));
    if let Some(nbf) = spec.not_before_in {
        claims.insert("nbf".to_string(), json!(now + nbf));
    }

    let mut header = Header::new(Algorithm::RS256);
    header.kid = spec.kid.clone();

    let pem = if spec.untrusted {
        UNTRUSTED_KEY_PEM
    } else {
        TRUSTED_KEY_PEM
    };
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("fixture key must parse");

    encode(&header, &claims, &key).expect("failed to mint test token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_key_sets_parse() {
        assert_eq!(
            trusted_jwks().keys[0].common.key_id.as_deref(),
            Some(TRUSTED_KID)
        );
        assert_eq!(
            untrusted_jwks().keys[0].common.key_id.as_deref(),
            Some(UNTRUSTED_KID)
        );
    }

    #[test]
    fn test_minted_token_header() {
        let token = mint_token(&TokenSpec::new("https://issuer", "aud").untrusted());
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(UNTRUSTED_KID));
    }
}
