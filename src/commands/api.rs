//! `hello`, `me` and `todos`

use colored::Colorize;
use prettytable::{format, Table};

use crate::cli::TodoCommand;
use crate::client::api::ApiClient;
use crate::client::session::TokenSession;
use crate::commands::{build_session, resume_session};
use crate::config::Config;
use crate::error::{ForgeError, Result};

fn api_client<'s>(config: &Config, session: &'s TokenSession) -> Result<ApiClient<'s>> {
    ApiClient::new(
        reqwest::Client::new(),
        &config.client.api_base,
        session,
        config.client.min_validity_seconds,
    )
}

/// Adds a login hint to session-level failures.
fn explain(err: anyhow::Error) -> anyhow::Error {
    if matches!(
        err.downcast_ref::<ForgeError>(),
        Some(ForgeError::NotAuthenticated | ForgeError::SessionEnded(_))
    ) {
        eprintln!("Run {} to sign in.", "forge-gate login".cyan());
    }
    err
}

/// Calls the anonymous hello endpoint.
pub async fn hello(config: &Config) -> Result<()> {
    let session = build_session(config)?;
    let greeting = api_client(config, &session)?.hello().await?;
    println!("{}", greeting.message);
    Ok(())
}

/// Prints the identity the gateway derived from the token.
pub async fn me(config: &Config) -> Result<()> {
    let (session, _) = resume_session(config).await?;
    let identity = api_client(config, &session)?.me().await.map_err(explain)?;

    println!("{} {}", "Signed in as".bold(), identity.name.cyan());

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row!["Claim".bold(), "Value".bold()]);
    for claim in identity.claims {
        table.add_row(prettytable::row![claim.claim_type, claim.value]);
    }
    table.printstd();
    Ok(())
}

/// Lists or adds to-do items.
pub async fn todos(config: &Config, command: TodoCommand) -> Result<()> {
    let (session, _) = resume_session(config).await?;
    let client = api_client(config, &session)?;

    match command {
        TodoCommand::List { json } => {
            let items = client.list_todos().await.map_err(explain)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
                return Ok(());
            }

            if items.is_empty() {
                println!("{}", "No to-do items yet.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
            table.add_row(prettytable::row![
                "ID".bold(),
                "Title".bold(),
                "Done".bold(),
                "Created".bold()
            ]);
            for item in items {
                let done = if item.is_done {
                    "yes".green()
                } else {
                    "no".normal()
                };
                table.add_row(prettytable::row![
                    item.id.to_string().cyan(),
                    item.title,
                    done,
                    item.created_at.format("%Y-%m-%d %H:%M")
                ]);
            }
            table.printstd();
        }
        TodoCommand::Add { title, done } => {
            let item = client.create_todo(&title, done).await.map_err(explain)?;
            println!(
                "{}",
                format!("Created to-do #{}: {}", item.id, item.title).green()
            );
        }
    }

    Ok(())
}
