//! `login`, `logout` and `status`

use chrono::Utc;
use colored::Colorize;

use crate::client::session::{InitMode, SessionState};
use crate::commands::{build_session, ctrl_c_token, resume_session};
use crate::config::Config;
use crate::error::Result;

/// Logs in through the browser and stores the refresh credential.
pub async fn login(config: &Config) -> Result<()> {
    let session = build_session(config)?;
    let cancel = ctrl_c_token();

    tracing::info!(authority = %config.auth.authority, "Starting interactive login");
    session.initialize(InitMode::Interactive, &cancel).await?;

    match session.lease().await {
        Some(lease) => println!(
            "{} token valid until {}",
            "Logged in,".green(),
            lease.expires_at().format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("{}", "Logged in.".green()),
    }
    Ok(())
}

/// Ends the session at the provider and forgets the stored credential.
pub async fn logout(config: &Config) -> Result<()> {
    let (session, _) = resume_session(config).await?;

    if let Err(e) = session.logout().await {
        tracing::warn!(error = %format!("{e:#}"), "Provider logout failed");
        println!(
            "{}",
            "Logged out locally; the identity provider could not be reached.".yellow()
        );
        return Ok(());
    }

    println!("{}", "Logged out.".green());
    Ok(())
}

/// Prints whether a stored session can be resumed.
pub async fn status(config: &Config) -> Result<()> {
    let (session, state) = resume_session(config).await?;

    match (state, session.lease().await) {
        (SessionState::Authenticated, Some(lease)) => {
            let remaining = lease.remaining_at(Utc::now()).num_seconds().max(0);
            println!(
                "{} token expires in {}s ({})",
                "● Authenticated".green().bold(),
                remaining,
                lease.expires_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        _ => {
            println!("{}", "○ Logged out".red().bold());
            println!("Run {} to sign in.", "forge-gate login".cyan());
        }
    }
    Ok(())
}
