//! Route protection
//!
//! Every route is registered with an explicit [`RouteAccess`] tag. Protected
//! routes get [`require_authorization`] as a route layer: it extracts the
//! bearer token, validates it, applies the [`AccessPolicy`] and inserts the
//! [`AuthorizationContext`] before the handler runs. Rejected requests never
//! reach handlers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Json;
use serde_json::json;

use crate::gateway::context::AuthorizationContext;
use crate::gateway::validator::{Rejection, TokenValidator, ValidationError};

/// Whether a route needs a valid bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Anonymous,
    Protected,
}

/// Decides whether an authenticated caller may use a protected route.
pub trait AccessPolicy: Send + Sync {
    fn permits(&self, context: &AuthorizationContext) -> bool;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Admits every authenticated caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticatedOnly;

impl AccessPolicy for AuthenticatedOnly {
    fn permits(&self, _context: &AuthorizationContext) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "authenticated"
    }
}

/// Admits callers carrying a specific claim value, e.g. a realm role.
#[derive(Debug, Clone)]
pub struct RequireClaim {
    pub claim_type: String,
    pub value: String,
}

impl RequireClaim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

impl AccessPolicy for RequireClaim {
    fn permits(&self, context: &AuthorizationContext) -> bool {
        context.has_claim(&self.claim_type, &self.value)
    }

    fn name(&self) -> &'static str {
        "require_claim"
    }
}

/// State shared by the authorization layer.
#[derive(Clone)]
pub struct GatewayState {
    validator: Arc<TokenValidator>,
    policy: Arc<dyn AccessPolicy>,
}

impl GatewayState {
    pub fn new(validator: Arc<TokenValidator>, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { validator, policy }
    }

    /// Gateway admitting any authenticated caller.
    pub fn authenticated(validator: Arc<TokenValidator>) -> Self {
        Self::new(validator, Arc::new(AuthenticatedOnly))
    }
}

/// Applies `access` to a method router.
pub fn guard<S>(route: MethodRouter<S>, access: RouteAccess, gate: &GatewayState) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    match access {
        RouteAccess::Anonymous => route,
        RouteAccess::Protected => route.route_layer(middleware::from_fn_with_state(
            gate.clone(),
            require_authorization,
        )),
    }
}

/// Authentication and authorization for protected routes.
pub async fn require_authorization(
    State(gate): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        tracing::debug!(reason = Rejection::MissingToken.code(), "Request rejected");
        return unauthorized();
    };

    let context = match gate.validator.validate(&token).await {
        Ok(context) => context,
        Err(ValidationError::Rejected(rejection)) => {
            tracing::debug!(reason = rejection.code(), "Request rejected");
            return unauthorized();
        }
        Err(ValidationError::KeysUnavailable(detail)) => {
            tracing::warn!(error = %detail, "Cannot verify token, signing keys unavailable");
            return service_unavailable();
        }
    };

    if !gate.policy.permits(&context) {
        tracing::debug!(
            policy = gate.policy.name(),
            subject = %context.subject(),
            "Request denied by access policy"
        );
        return forbidden();
    }

    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Uniform 401 for every authentication failure.
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "forbidden" })),
    )
        .into_response()
}

fn service_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "service unavailable" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc".to_string()));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc".to_string()));
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_unauthorized_shape() {
        let response = unauthorized();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn test_require_claim_policy() {
        let claims = serde_json::json!({ "sub": "u", "roles": ["admin", "user"] });
        let context = AuthorizationContext::from_claims(claims.as_object().unwrap(), "sub");

        assert!(RequireClaim::new("roles", "admin").permits(&context));
        assert!(!RequireClaim::new("roles", "auditor").permits(&context));
        assert!(AuthenticatedOnly.permits(&context));
    }
}
