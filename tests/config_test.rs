//! Configuration loading tests

mod common;

use serial_test::serial;

use common::temp_config_file;
use forge_gate::cli::{Cli, Commands};
use forge_gate::Config;

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let config = Config::load(
        concat!(env!("CARGO_MANIFEST_DIR"), "/config/forge-gate.yaml"),
        &Cli::default(),
    )
    .unwrap();

    config.validate_server().unwrap();
    config.validate_client().unwrap();
    assert_eq!(config.auth.name_claim, "preferred_username");
}

#[test]
#[serial]
fn test_partial_file_fills_defaults() {
    let (_dir, path) = temp_config_file(
        r#"
auth:
  authority: "https://sso.example.com/realms/forge"
  audience: "todo-api"
server:
  database_url: ":memory:"
"#,
    );

    let config = Config::load(path.to_str().unwrap(), &Cli::default()).unwrap();

    assert_eq!(config.server.bind_address, "127.0.0.1:8080");
    assert_eq!(config.auth.name_claim, "sub");
    assert_eq!(config.auth.leeway_seconds, 30);
    assert_eq!(config.client.min_validity_seconds, 30);
    config.validate_server().unwrap();
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let (_dir, path) = temp_config_file(
        r#"
auth:
  authority: "https://sso.example.com/realms/forge"
  audience: "todo-api"
"#,
    );

    std::env::set_var("FORGE_AUTH_AUDIENCE", "other-api");
    std::env::set_var("FORGE_DATABASE_URL", ":memory:");
    let config = Config::load(path.to_str().unwrap(), &Cli::default());
    std::env::remove_var("FORGE_AUTH_AUDIENCE");
    std::env::remove_var("FORGE_DATABASE_URL");

    let config = config.unwrap();
    assert_eq!(config.auth.audience, "other-api");
    assert_eq!(config.server.database_url, ":memory:");
}

#[test]
#[serial]
fn test_cli_bind_wins_over_file() {
    let (_dir, path) = temp_config_file(
        r#"
server:
  bind_address: "127.0.0.1:8080"
"#,
    );
    let cli = Cli {
        command: Commands::Serve {
            bind: Some("0.0.0.0:9000".to_string()),
        },
        ..Cli::default()
    };

    let config = Config::load(path.to_str().unwrap(), &cli).unwrap();
    assert_eq!(config.server.bind_address, "0.0.0.0:9000");
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    let (_dir, path) = temp_config_file("server: [not, a, map");
    assert!(Config::load(path.to_str().unwrap(), &Cli::default()).is_err());
}
