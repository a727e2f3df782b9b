//! Forge Gate - bearer-token gateway and token-session client
//!
//! This library provides both halves of an OpenID Connect protected to-do
//! API: the server-side gateway that validates JWT bearer tokens before a
//! request reaches a handler, and the client-side session that logs in,
//! keeps an access token fresh and attaches it to outgoing calls.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `gateway`: signing-key cache, token validation and the axum guard
//! - `server`: route table, handlers and the serve loop
//! - `store`: to-do persistence (SQLite)
//! - `client`: OIDC login, token lease, coalesced renewal and the API client
//! - `commands`: CLI command handlers
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use forge_gate::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/forge-gate.yaml", &Default::default())?;
//!     config.validate_server()?;
//!     forge_gate::server::serve(&config).await
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use client::{ApiClient, TokenSession};
pub use config::Config;
pub use error::{ForgeError, Result};
pub use gateway::{AuthorizationContext, TokenValidator};

#[cfg(test)]
pub mod test_utils;
