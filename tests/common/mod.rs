//! Shared helpers for integration tests
//!
//! Mints RS256 tokens with the fixture keys, builds a gateway router over an
//! in-memory store and mounts a fake identity provider on a wiremock server.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use forge_gate::gateway::jwks::SigningKeyCache;
use forge_gate::gateway::middleware::GatewayState;
use forge_gate::gateway::validator::{TokenValidator, ValidatorConfig};
use forge_gate::server::{self, AppState};
use forge_gate::store::{SqliteTodoStore, TodoStore};

pub const ISSUER: &str = "https://idp.example.test/realms/forge";
pub const AUDIENCE: &str = "todo-api";
pub const TRUSTED_KID: &str = "trusted-key-1";

const TRUSTED_KEY_PEM: &str = include_str!("../fixtures/trusted_key.pem");
const UNTRUSTED_KEY_PEM: &str = include_str!("../fixtures/untrusted_key.pem");
const TRUSTED_JWKS: &str = include_str!("../fixtures/trusted_jwks.json");

#[allow(dead_code)]
pub fn trusted_jwks_json() -> Value {
    serde_json::from_str(TRUSTED_JWKS).expect("trusted JWKS fixture must parse")
}

#[allow(dead_code)]
pub fn trusted_jwks() -> JwkSet {
    serde_json::from_str(TRUSTED_JWKS).expect("trusted JWKS fixture must parse")
}

/// Claims for a five-minute token issued to `user-1`.
#[allow(dead_code)]
pub fn base_claims(issuer: &str, audience: &str) -> Map<String, Value> {
    let now = chrono::Utc::now().timestamp();
    let mut claims = Map::new();
    claims.insert("iss".to_string(), json!(issuer));
    claims.insert("aud".to_string(), json!(audience));
    claims.insert("sub".to_string(), json!("user-1"));
    claims.insert("iat".to_string(), json!(now));
    claims.insert("exp".to_string(), json!(now + 300));
    claims
}

/// Signs `claims` with the trusted fixture key.
#[allow(dead_code)]
pub fn sign(claims: &Map<String, Value>, kid: Option<&str>) -> String {
    sign_with(TRUSTED_KEY_PEM, claims, kid)
}

/// Signs `claims` with a key the gateway does not trust.
#[allow(dead_code)]
pub fn sign_untrusted(claims: &Map<String, Value>) -> String {
    sign_with(UNTRUSTED_KEY_PEM, claims, Some("untrusted-key-1"))
}

fn sign_with(pem: &str, claims: &Map<String, Value>, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("fixture key must parse");
    encode(&header, claims, &key).expect("failed to sign test token")
}

/// A valid token for [`ISSUER`] and [`AUDIENCE`].
#[allow(dead_code)]
pub fn valid_token() -> String {
    sign(&base_claims(ISSUER, AUDIENCE), Some(TRUSTED_KID))
}

#[allow(dead_code)]
pub fn validator_config() -> ValidatorConfig {
    ValidatorConfig {
        issuer: ISSUER.to_string(),
        audience: AUDIENCE.to_string(),
        leeway_secs: 30,
        name_claim: "sub".to_string(),
    }
}

/// Gateway over `keys` and a fresh in-memory store.
#[allow(dead_code)]
pub fn gateway_with_keys(keys: SigningKeyCache) -> (axum::Router, Arc<SqliteTodoStore>) {
    let store = Arc::new(SqliteTodoStore::open(":memory:").expect("in-memory store must open"));
    let validator = TokenValidator::new(Arc::new(keys), validator_config());
    let cors = server::cors_layer(&["http://localhost:5173".to_string()])
        .expect("valid CORS origin");

    let app = server::router(
        AppState::new(store.clone() as Arc<dyn TodoStore>),
        GatewayState::authenticated(Arc::new(validator)),
        cors,
    );
    (app, store)
}

/// Gateway trusting only the fixture key.
#[allow(dead_code)]
pub fn gateway() -> (axum::Router, Arc<SqliteTodoStore>) {
    gateway_with_keys(SigningKeyCache::from_static(trusted_jwks()))
}

/// Mounts an OpenID configuration for `server` as its own issuer.
#[allow(dead_code)]
pub async fn mount_discovery(server: &MockServer) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": base,
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "jwks_uri": format!("{base}/jwks"),
            "end_session_endpoint": format!("{base}/logout"),
            "code_challenge_methods_supported": ["S256"],
            "id_token_signing_alg_values_supported": ["RS256"]
        })))
        .mount(server)
        .await;
}

/// Token endpoint success body.
#[allow(dead_code)]
pub fn token_body(access_token: &str, refresh_token: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "refresh_token": refresh_token,
    })
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("forge-gate.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// OIDC provider for `server` backed by `store`, with a custom launcher.
#[allow(dead_code)]
pub fn oidc_provider(
    server: &MockServer,
    store: Arc<forge_gate::client::MemoryCredentialStore>,
    launcher: Option<forge_gate::client::oidc::BrowserLauncher>,
) -> forge_gate::client::OidcProvider {
    let config = forge_gate::client::OidcClientConfig {
        authority: server.uri().parse().expect("mock server URI"),
        client_id: CLIENT_ID.to_string(),
        scope: "openid profile".to_string(),
        redirect_port: 0,
    };
    let provider = forge_gate::client::OidcProvider::new(reqwest::Client::new(), config, store);
    match launcher {
        Some(launcher) => provider.with_launcher(launcher),
        None => provider,
    }
}

pub const CLIENT_ID: &str = "forge-cli";

/// Keyring key the provider uses for `server`.
#[allow(dead_code)]
pub fn stored_key(server: &MockServer) -> String {
    forge_gate::client::credentials::credential_key(CLIENT_ID, &server.uri())
}
