//! Gateway HTTP server
//!
//! The route table below is the single place where access is decided: each
//! entry carries its [`RouteAccess`] tag and [`guard`] wraps the protected
//! ones in the authorization layer.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, MethodRouter};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::{AuthConfig, Config};
use crate::error::{ForgeError, Result};
use crate::gateway::jwks::{KeySource, SigningKeyCache, SigningKeyCacheConfig};
use crate::gateway::middleware::{guard, GatewayState, RouteAccess};
use crate::gateway::validator::{TokenValidator, ValidatorConfig};
use crate::store::{SqliteTodoStore, TodoStore};

pub mod handlers;

/// State handed to resource handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TodoStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn TodoStore>) -> Self {
        Self { store }
    }
}

/// One row of the route table.
pub struct RouteEntry {
    pub path: &'static str,
    pub access: RouteAccess,
    pub handler: MethodRouter<AppState>,
}

/// Every route the gateway serves, with its access tag.
pub fn routes() -> Vec<RouteEntry> {
    vec![
        RouteEntry {
            path: "/api/hello",
            access: RouteAccess::Anonymous,
            handler: get(handlers::hello),
        },
        RouteEntry {
            path: "/api/me",
            access: RouteAccess::Protected,
            handler: get(handlers::me),
        },
        RouteEntry {
            path: "/api/todos",
            access: RouteAccess::Protected,
            handler: get(handlers::list_todos).post(handlers::create_todo),
        },
        RouteEntry {
            path: "/health",
            access: RouteAccess::Anonymous,
            handler: get(handlers::health),
        },
        RouteEntry {
            path: "/alive",
            access: RouteAccess::Anonymous,
            handler: get(handlers::alive),
        },
    ]
}

/// Builds the gateway router.
pub fn router(state: AppState, gate: GatewayState, cors: CorsLayer) -> Router {
    routes()
        .into_iter()
        .fold(Router::new(), |router, entry| {
            router.route(entry.path, guard(entry.handler, entry.access, &gate))
        })
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS policy: explicit origins only, credentials allowed.
pub fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|e| anyhow::Error::from(ForgeError::Config(format!("invalid origin '{origin}': {e}"))))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}

/// Key cache settings from the auth config.
pub fn key_cache_config(auth: &AuthConfig) -> SigningKeyCacheConfig {
    SigningKeyCacheConfig::default()
        .with_default_ttl(Duration::from_secs(auth.jwks_cache_ttl_seconds))
        .with_min_refresh_interval(Duration::from_secs(auth.jwks_min_refresh_seconds))
        .with_allow_http(auth.allow_http_metadata)
}

/// Wires the validator and store from `config` into a router.
pub fn build_app(config: &Config) -> Result<Router> {
    let authority = Url::parse(&config.auth.authority).map_err(|e| {
        ForgeError::Config(format!("invalid authority '{}': {e}", config.auth.authority))
    })?;

    let keys = SigningKeyCache::new(
        KeySource::Discovery { authority },
        key_cache_config(&config.auth),
    )?;
    let validator = TokenValidator::new(Arc::new(keys), ValidatorConfig::from_auth(&config.auth));
    let store = SqliteTodoStore::open(&config.server.database_url)?;

    Ok(router(
        AppState::new(Arc::new(store)),
        GatewayState::authenticated(Arc::new(validator)),
        cors_layer(&config.server.allowed_origins)?,
    ))
}

/// Runs the gateway until Ctrl-C.
pub async fn serve(config: &Config) -> Result<()> {
    config.validate_server()?;
    let app = build_app(config)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|e| {
            ForgeError::Config(format!(
                "failed to bind {}: {e}",
                config.server.bind_address
            ))
        })?;
    tracing::info!(
        address = %listener.local_addr()?,
        authority = %config.auth.authority,
        audience = %config.auth.audience,
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
