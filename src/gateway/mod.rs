//! Server half: bearer-token verification in front of protected routes
//!
//! - `jwks` - the issuer's signing keys, cached
//! - `validator` - signature, issuer, audience and lifetime checks
//! - `context` - the per-request identity derived from a valid token
//! - `middleware` - route tags, access policies and the axum layer

pub mod context;
pub mod jwks;
pub mod middleware;
pub mod validator;

pub use context::{AuthorizationContext, Claim};
pub use jwks::{KeySource, SigningKeyCache, SigningKeyCacheConfig};
pub use middleware::{guard, AccessPolicy, AuthenticatedOnly, GatewayState, RequireClaim, RouteAccess};
pub use validator::{Rejection, TokenValidator, ValidationError, ValidatorConfig};
