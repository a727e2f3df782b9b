//! Command-line interface definition for Forge Gate
//!
//! This module defines the CLI structure using clap's derive API. One binary
//! covers both halves of the system: `serve` runs the authorization gateway,
//! the remaining commands drive the token session against a running gateway.

use clap::{Parser, Subcommand};

/// Forge Gate - bearer-token gateway and to-do client
///
/// Run the API gateway, or log in against the identity provider and call the
/// protected to-do API from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(name = "forge-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/forge-gate.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the API base URL used by client commands
    #[arg(long, env = "FORGE_API_BASE")]
    pub api_base: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Forge Gate
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the API gateway
    Serve {
        /// Override the bind address from config (e.g. 0.0.0.0:8080)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Log in interactively through the identity provider
    Login,

    /// End the current session and forget stored credentials
    Logout,

    /// Show whether an existing session can be resumed
    Status,

    /// Call the anonymous hello endpoint
    Hello,

    /// Show the identity and claims the gateway derived from your token
    Me,

    /// Manage to-do items
    Todos {
        /// To-do subcommand
        #[command(subcommand)]
        command: TodoCommand,
    },
}

/// To-do subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum TodoCommand {
    /// List to-do items, newest first
    List {
        /// Output raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Add a to-do item
    Add {
        /// Title of the new item
        title: String,

        /// Mark the item as already done
        #[arg(long)]
        done: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/forge-gate.yaml".to_string()),
            verbose: false,
            json_logs: false,
            api_base: None,
            command: Commands::Status,
        }
    }
}
