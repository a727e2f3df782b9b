//! Forge Gate - bearer-token gateway and to-do client
//!
#![doc = "Main entry point for the Forge Gate binary."]

use anyhow::Result;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forge_gate::cli::{Cli, Commands};
use forge_gate::commands;
use forge_gate::config::Config;
use forge_gate::server;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/forge-gate.yaml");
    let config = Config::load(config_path, &cli)?;

    // Execute command
    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting gateway");
            server::serve(&config).await
        }
        Commands::Login => commands::auth::login(&config).await,
        Commands::Logout => commands::auth::logout(&config).await,
        Commands::Status => commands::auth::status(&config).await,
        Commands::Hello => commands::api::hello(&config).await,
        Commands::Me => commands::api::me(&config).await,
        Commands::Todos { command } => commands::api::todos(&config, command).await,
    }
}

/// Initialize tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug output.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "forge_gate=debug,tower_http=debug"
    } else {
        "forge_gate=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
