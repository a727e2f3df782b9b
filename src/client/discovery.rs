//! OpenID Connect discovery
//!
//! Locates the identity provider's endpoints before any login, renewal or
//! key-loading request is made. Keycloak-style authorities carry a realm path
//! (`https://sso.example.com/realms/forge`), so the path-appended
//! `<issuer>/.well-known/openid-configuration` form is tried first, followed
//! by the RFC 8414 path-inserted form.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ForgeError, Result};

// ---------------------------------------------------------------------------
// Provider metadata
// ---------------------------------------------------------------------------

/// Subset of the OpenID Provider Metadata document this crate relies on.
///
/// Unknown members are kept in `extra` so diagnostics can print the full
/// document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; must match the configured authority.
    pub issuer: String,

    /// Authorization endpoint used by the interactive login.
    pub authorization_endpoint: String,

    /// Token endpoint used for code exchange and renewal.
    pub token_endpoint: String,

    /// Location of the provider's signing keys.
    pub jwks_uri: String,

    /// RP-initiated logout endpoint, when the provider supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderMetadata {
    /// Parses the `jwks_uri` member.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Upstream`] when the provider advertised a value
    /// that is not an absolute URL.
    pub fn jwks_url(&self) -> Result<Url> {
        Url::parse(&self.jwks_uri).map_err(|e| {
            ForgeError::Upstream(format!("invalid jwks_uri '{}': {e}", self.jwks_uri)).into()
        })
    }
}

// ---------------------------------------------------------------------------
// Discovery helpers
// ---------------------------------------------------------------------------

/// Builds the ordered list of well-known URLs to try for `authority`.
fn build_candidate_urls(authority: &Url) -> Vec<Url> {
    let path = authority.path().trim_end_matches('/').to_string();
    let mut candidates = Vec::with_capacity(2);

    // <issuer>/.well-known/openid-configuration
    let mut appended = authority.clone();
    appended.set_path(&format!("{}/.well-known/openid-configuration", path));
    appended.set_query(None);
    appended.set_fragment(None);
    candidates.push(appended);

    // <origin>/.well-known/openid-configuration<path>
    if !path.is_empty() {
        let mut inserted = authority.clone();
        inserted.set_path(&format!("/.well-known/openid-configuration{}", path));
        inserted.set_query(None);
        inserted.set_fragment(None);
        candidates.push(inserted);
    }

    candidates
}

/// Compares issuer identifiers, ignoring a single trailing slash.
pub fn issuer_matches(expected: &str, actual: &str) -> bool {
    expected.trim_end_matches('/') == actual.trim_end_matches('/')
}

/// Fetches the provider metadata for `authority`.
///
/// Candidates are tried in order; a non-success status moves on to the next
/// one. A document whose `issuer` differs from `authority` is rejected, since
/// every token it would lead to would fail issuer validation anyway.
///
/// # Errors
///
/// Returns [`ForgeError::Upstream`] when the provider cannot be reached, no
/// candidate answers successfully, or the document is malformed.
pub async fn fetch_provider_metadata(
    http: &reqwest::Client,
    authority: &Url,
) -> Result<ProviderMetadata> {
    let mut last_error = None;

    for url in build_candidate_urls(authority) {
        tracing::debug!(url = %url, "Fetching provider metadata");

        let resp = match http.get(url.clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                last_error = Some(format!("request to {url} failed: {e}"));
                continue;
            }
        };

        if !resp.status().is_success() {
            last_error = Some(format!("{url} returned {}", resp.status()));
            continue;
        }

        let meta: ProviderMetadata = resp.json().await.map_err(|e| {
            ForgeError::Upstream(format!("failed to parse provider metadata from {url}: {e}"))
        })?;

        if !issuer_matches(authority.as_str(), &meta.issuer) {
            return Err(ForgeError::Upstream(format!(
                "provider metadata issuer '{}' does not match authority '{}'",
                meta.issuer, authority
            ))
            .into());
        }

        return Ok(meta);
    }

    Err(ForgeError::Upstream(format!(
        "provider metadata not found for {authority}: {}",
        last_error.unwrap_or_else(|| "no candidate URLs".to_string())
    ))
    .into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
