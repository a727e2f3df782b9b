//! Signing-key loading tests against a fake identity provider
//!
//! Covers discovery of `jwks_uri`, caching, refresh on an unknown `kid` and
//! the fail-closed behavior when keys cannot be loaded.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use common::{base_claims, gateway_with_keys, mount_discovery, sign, AUDIENCE, ISSUER, TRUSTED_KID};
use forge_gate::gateway::jwks::{KeyError, KeySource, SigningKeyCache, SigningKeyCacheConfig};
use forge_gate::gateway::validator::{TokenValidator, ValidationError, ValidatorConfig};

const UNTRUSTED_JWKS: &str = include_str!("fixtures/untrusted_jwks.json");

fn dev_config() -> SigningKeyCacheConfig {
    SigningKeyCacheConfig::default()
        .with_allow_http(true)
        .with_min_refresh_interval(Duration::ZERO)
}

fn remote_keys(server: &MockServer) -> SigningKeyCache {
    let jwks_uri = format!("{}/jwks", server.uri()).parse().unwrap();
    SigningKeyCache::new(KeySource::Remote { jwks_uri }, dev_config()).unwrap()
}

async fn status_for(app: &axum::Router, token: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri("/api/todos")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// Serves the untrusted key set first, the trusted one afterwards.
struct RotatingKeys {
    calls: AtomicUsize,
}

impl Respond for RotatingKeys {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let body: Value = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            serde_json::from_str(UNTRUSTED_JWKS).unwrap()
        } else {
            common::trusted_jwks_json()
        };
        ResponseTemplate::new(200).set_body_json(body)
    }
}

#[tokio::test]
async fn test_keys_are_discovered_and_cached() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "public, max-age=600")
                .set_body_json(common::trusted_jwks_json()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let authority = server.uri().parse().unwrap();
    let keys = SigningKeyCache::new(KeySource::Discovery { authority }, dev_config()).unwrap();
    let validator = TokenValidator::new(
        std::sync::Arc::new(keys),
        ValidatorConfig {
            issuer: server.uri(),
            ..common::validator_config()
        },
    );

    let token = sign(&base_claims(&server.uri(), AUDIENCE), Some(TRUSTED_KID));
    for _ in 0..3 {
        let context = validator.validate(&token).await.unwrap();
        assert_eq!(context.subject(), "user-1");
    }

    server.verify().await;
}

#[tokio::test]
async fn test_unknown_kid_triggers_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(RotatingKeys {
            calls: AtomicUsize::new(0),
        })
        .expect(2)
        .mount(&server)
        .await;

    let (app, _) = gateway_with_keys(remote_keys(&server));
    let token = sign(&base_claims(ISSUER, AUDIENCE), Some(TRUSTED_KID));

    let (status, _) = status_for(&app, &token).await;
    assert_eq!(status, StatusCode::OK);

    server.verify().await;
}

#[tokio::test]
async fn test_kid_missing_after_refresh_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::from_str::<Value>(UNTRUSTED_JWKS).unwrap()),
        )
        .mount(&server)
        .await;

    let (app, _) = gateway_with_keys(remote_keys(&server));
    let token = sign(&base_claims(ISSUER, AUDIENCE), Some(TRUSTED_KID));

    let (status, body) = status_for(&app, &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "unauthorized" }));
}

#[tokio::test]
async fn test_key_endpoint_error_fails_closed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (app, store) = gateway_with_keys(remote_keys(&server));
    let (status, body) = status_for(&app, &common::valid_token()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "error": "service unavailable" }));
    use forge_gate::store::TodoStore;
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreachable_provider_fails_closed() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let jwks_uri = format!("http://127.0.0.1:{port}/jwks").parse().unwrap();
    let keys = SigningKeyCache::new(KeySource::Remote { jwks_uri }, dev_config()).unwrap();

    let (app, _) = gateway_with_keys(keys);
    let (status, _) = status_for(&app, &common::valid_token()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_plain_http_keys_need_opt_in() {
    let jwks_uri = "http://idp.example.test/jwks".parse().unwrap();
    let keys = SigningKeyCache::new(
        KeySource::Remote { jwks_uri },
        SigningKeyCacheConfig::default(),
    )
    .unwrap();

    let err = keys.keys_for(Some(TRUSTED_KID)).await.unwrap_err();
    assert!(matches!(err, KeyError::InsecureScheme(_)));

    let validator = TokenValidator::new(std::sync::Arc::new(keys), common::validator_config());
    let err = validator.validate(&common::valid_token()).await.unwrap_err();
    assert!(matches!(err, ValidationError::KeysUnavailable(_)));
}

#[tokio::test]
async fn test_failed_discovery_is_not_retried_within_refresh_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let authority = server.uri().parse().unwrap();
    let keys = SigningKeyCache::new(
        KeySource::Discovery { authority },
        SigningKeyCacheConfig::default().with_allow_http(true),
    )
    .unwrap();
    let validator = TokenValidator::new(
        std::sync::Arc::new(keys),
        ValidatorConfig {
            issuer: server.uri(),
            ..common::validator_config()
        },
    );

    let token = sign(&base_claims(&server.uri(), AUDIENCE), Some(TRUSTED_KID));
    for _ in 0..10 {
        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err, ValidationError::KeysUnavailable(_)));
    }

    server.verify().await;
}

#[tokio::test]
async fn test_failed_key_fetch_is_retried_after_refresh_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let jwks_uri = format!("{}/jwks", server.uri()).parse().unwrap();
    let keys = SigningKeyCache::new(
        KeySource::Remote { jwks_uri },
        dev_config().with_min_refresh_interval(Duration::from_millis(50)),
    )
    .unwrap();

    for _ in 0..3 {
        assert!(keys.keys_for(Some(TRUSTED_KID)).await.is_err());
    }
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(keys.keys_for(Some(TRUSTED_KID)).await.is_err());

    server.verify().await;
}

#[tokio::test]
async fn test_oversized_key_set_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::trusted_jwks_json()))
        .mount(&server)
        .await;

    let jwks_uri = format!("{}/jwks", server.uri()).parse().unwrap();
    let keys = SigningKeyCache::new(
        KeySource::Remote { jwks_uri },
        SigningKeyCacheConfig {
            max_response_size: 64,
            ..dev_config()
        },
    )
    .unwrap();

    match keys.keys_for(Some(TRUSTED_KID)).await {
        Err(KeyError::Unavailable(message)) => assert!(message.contains("exceeds 64 bytes")),
        other => panic!("expected an unavailable key set, got {:?}", other.map(|k| k.len())),
    }

    let (app, _) = gateway_with_keys(keys);
    let (status, _) = status_for(&app, &common::valid_token()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
