//! Client half: identity-provider protocol, token session and API client
//!
//! - `discovery` - OpenID Connect provider metadata
//! - `pkce` - S256 challenge generation
//! - `credentials` - refresh-credential persistence
//! - `provider` - the structured login/renew protocol
//! - `oidc` - OpenID Connect implementation of that protocol
//! - `lease` - the bearer-token lease
//! - `session` - lease lifecycle and coalesced renewal
//! - `api` - typed to-do API client

pub mod api;
pub mod credentials;
pub mod discovery;
pub mod lease;
pub mod oidc;
pub mod pkce;
pub mod provider;
pub mod session;

pub use api::ApiClient;
pub use credentials::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use lease::{LeaseState, TokenLease};
pub use oidc::{OidcClientConfig, OidcProvider};
pub use provider::{IdentityProvider, InitMode, LoginResponse, RenewResponse, TokenGrant};
pub use session::{Freshness, SessionState, TokenSession};
