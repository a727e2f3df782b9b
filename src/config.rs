//! Configuration management for Forge Gate
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Nothing security-relevant is hardcoded: the issuer authority, audience,
//! allowed origins and store location all default to empty and must be
//! supplied before [`Config::validate_server`] passes.

use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Main configuration structure for Forge Gate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Token validation settings shared by gateway and client
    #[serde(default)]
    pub auth: AuthConfig,
    /// Client-side session settings
    #[serde(default)]
    pub client: ClientConfig,
}

/// Gateway server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the gateway listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Origins allowed to receive credentialed cross-origin responses
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// SQLite connection string: a file path or `:memory:`
    #[serde(default)]
    pub database_url: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            allowed_origins: Vec::new(),
            database_url: String::new(),
        }
    }
}

/// Token validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Issuer authority URL (e.g. `https://sso.example.com/realms/forge`)
    #[serde(default)]
    pub authority: String,

    /// Audience the gateway expects in the `aud` claim
    #[serde(default)]
    pub audience: String,

    /// Claim used as the subject name in the authorization context
    #[serde(default = "default_name_claim")]
    pub name_claim: String,

    /// Clock skew tolerated for `exp`/`nbf` checks (seconds)
    #[serde(default = "default_leeway")]
    pub leeway_seconds: u64,

    /// Signing-key cache TTL when the provider sends no `Cache-Control`
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_seconds: u64,

    /// Minimum spacing between key refreshes triggered by unknown `kid`s
    #[serde(default = "default_jwks_min_refresh")]
    pub jwks_min_refresh_seconds: u64,

    /// Allow plain-HTTP discovery and key endpoints (local development only)
    #[serde(default)]
    pub allow_http_metadata: bool,
}

fn default_name_claim() -> String {
    "sub".to_string()
}

fn default_leeway() -> u64 {
    30
}

fn default_jwks_cache_ttl() -> u64 {
    3600
}

fn default_jwks_min_refresh() -> u64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authority: String::new(),
            audience: String::new(),
            name_claim: default_name_claim(),
            leeway_seconds: default_leeway(),
            jwks_cache_ttl_seconds: default_jwks_cache_ttl(),
            jwks_min_refresh_seconds: default_jwks_min_refresh(),
            allow_http_metadata: false,
        }
    }
}

impl AuthConfig {
    /// Clock skew as a [`Duration`]
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_seconds)
    }
}

/// Client session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the gateway (e.g. `http://127.0.0.1:8080`)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Public client identifier registered with the identity provider
    #[serde(default)]
    pub client_id: String,

    /// Loopback port for the login redirect; `0` lets the OS choose
    #[serde(default)]
    pub redirect_port: u16,

    /// Scopes requested at login
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Minimum remaining token lifetime before a call triggers renewal
    #[serde(default = "default_min_validity")]
    pub min_validity_seconds: u64,
}

fn default_api_base() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_scope() -> String {
    "openid profile".to_string()
}

fn default_min_validity() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            client_id: String::new(),
            redirect_port: 0,
            scope: default_scope(),
            min_validity_seconds: default_min_validity(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and the
    /// environment is expected to supply the rest.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ForgeError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ForgeError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        // Server overrides
        if let Ok(bind) = std::env::var("FORGE_BIND_ADDRESS") {
            self.server.bind_address = bind;
        }

        if let Ok(origins) = std::env::var("FORGE_ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            tracing::debug!(origins = ?self.server.allowed_origins, "Env override: FORGE_ALLOWED_ORIGINS");
        }

        if let Ok(database_url) = std::env::var("FORGE_DATABASE_URL") {
            self.server.database_url = database_url;
        }

        // Auth overrides
        if let Ok(authority) = std::env::var("FORGE_AUTH_AUTHORITY") {
            self.auth.authority = authority;
        }

        if let Ok(audience) = std::env::var("FORGE_AUTH_AUDIENCE") {
            self.auth.audience = audience;
        }

        if let Ok(name_claim) = std::env::var("FORGE_AUTH_NAME_CLAIM") {
            self.auth.name_claim = name_claim;
        }

        if let Ok(leeway) = std::env::var("FORGE_AUTH_LEEWAY_SECONDS") {
            if let Ok(v) = leeway.parse::<u64>() {
                self.auth.leeway_seconds = v;
            } else {
                tracing::warn!("Invalid FORGE_AUTH_LEEWAY_SECONDS: {}", leeway);
            }
        }

        if let Ok(allow_http) = std::env::var("FORGE_AUTH_ALLOW_HTTP_METADATA") {
            match allow_http.to_lowercase().parse::<bool>() {
                Ok(v) => self.auth.allow_http_metadata = v,
                Err(_) => tracing::warn!(
                    "Invalid value for FORGE_AUTH_ALLOW_HTTP_METADATA: {}",
                    allow_http
                ),
            }
        }

        // Client overrides
        if let Ok(api_base) = std::env::var("FORGE_API_BASE") {
            self.client.api_base = api_base;
        }

        if let Ok(client_id) = std::env::var("FORGE_CLIENT_ID") {
            self.client.client_id = client_id;
        }

        if let Ok(min_validity) = std::env::var("FORGE_CLIENT_MIN_VALIDITY_SECONDS") {
            if let Ok(v) = min_validity.parse::<u64>() {
                self.client.min_validity_seconds = v;
            } else {
                tracing::warn!("Invalid FORGE_CLIENT_MIN_VALIDITY_SECONDS: {}", min_validity);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(api_base) = &cli.api_base {
            self.client.api_base = api_base.clone();
        }

        if let crate::cli::Commands::Serve { bind: Some(bind) } = &cli.command {
            self.server.bind_address = bind.clone();
        }
    }

    /// Validate the settings the gateway needs
    ///
    /// # Errors
    ///
    /// Returns error if the authority, audience, store or CORS settings are
    /// missing or unsafe
    pub fn validate_server(&self) -> Result<()> {
        self.validate_authority()?;

        if self.auth.audience.trim().is_empty() {
            return Err(ForgeError::Config("auth.audience must be set".to_string()).into());
        }

        if self.auth.leeway_seconds > 300 {
            return Err(ForgeError::Config(
                "auth.leeway_seconds must be less than or equal to 300".to_string(),
            )
            .into());
        }

        if self.auth.jwks_cache_ttl_seconds == 0 {
            return Err(ForgeError::Config(
                "auth.jwks_cache_ttl_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.database_url.trim().is_empty() {
            return Err(
                ForgeError::Config("server.database_url must be set".to_string()).into(),
            );
        }

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ForgeError::Config(format!(
                "server.bind_address is not a socket address: {}",
                self.server.bind_address
            ))
            .into());
        }

        for origin in &self.server.allowed_origins {
            validate_origin(origin)?;
        }

        Ok(())
    }

    /// Validate the settings client commands need
    ///
    /// # Errors
    ///
    /// Returns error if the authority, client id or API base are unusable
    pub fn validate_client(&self) -> Result<()> {
        self.validate_authority()?;

        if self.client.client_id.trim().is_empty() {
            return Err(ForgeError::Config("client.client_id must be set".to_string()).into());
        }

        Url::parse(&self.client.api_base).map_err(|e| {
            ForgeError::Config(format!(
                "client.api_base is not a URL ({}): {}",
                e, self.client.api_base
            ))
        })?;

        if self.client.min_validity_seconds >= 3600 {
            return Err(ForgeError::Config(
                "client.min_validity_seconds must be less than 3600".to_string(),
            )
            .into());
        }

        Ok(())
    }

    fn validate_authority(&self) -> Result<()> {
        if self.auth.authority.trim().is_empty() {
            return Err(ForgeError::Config("auth.authority must be set".to_string()).into());
        }

        let url = Url::parse(&self.auth.authority).map_err(|e| {
            ForgeError::Config(format!("auth.authority is not a URL ({}): {}", e, self.auth.authority))
        })?;

        match url.scheme() {
            "https" => Ok(()),
            "http" if self.auth.allow_http_metadata => Ok(()),
            "http" => Err(ForgeError::Config(
                "auth.authority uses http; set auth.allow_http_metadata for local development"
                    .to_string(),
            )
            .into()),
            other => Err(ForgeError::Config(format!(
                "auth.authority has unsupported scheme: {}",
                other
            ))
            .into()),
        }
    }
}

/// Checks that a CORS origin is an explicit `scheme://host[:port]`.
fn validate_origin(origin: &str) -> Result<()> {
    if origin.contains('*') {
        return Err(ForgeError::Config(format!(
            "server.allowed_origins cannot contain wildcards when credentials are allowed: {}",
            origin
        ))
        .into());
    }

    let url = Url::parse(origin)
        .map_err(|e| ForgeError::Config(format!("invalid origin {} ({})", origin, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ForgeError::Config(format!("invalid origin: {}", origin)).into());
    }

    if url.path() != "/" || url.query().is_some() {
        return Err(ForgeError::Config(format!(
            "origin must not carry a path or query: {}",
            origin
        ))
        .into());
    }

    Ok(())
}
