//! Command-line entry points.
//!
//! `serve` runs the HTTP service. Every other command runs one storage
//! operation against the configured database and blob store and prints the
//! result as JSON on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::Config;
use crate::handlers::admin::target_fraction;
use crate::models::UserRole;
use crate::services::{AuthService, Services, DEFAULT_TOP_OWNERS};

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Manuscript storage with quota and reclamation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Print current storage usage
    Stats,
    /// Print usage with per-status, per-owner and per-type totals
    Report {
        /// Number of owners to list
        #[arg(long, default_value_t = DEFAULT_TOP_OWNERS)]
        top: i64,
    },
    /// Reclaim space down to a target percentage of capacity
    Cleanup {
        /// Target usage in percent, exclusive bounds 0 and 100
        #[arg(long)]
        target_percent: Option<f64>,
    },
    /// Delete blobs that no record references
    CleanupOrphaned {
        /// Only list the orphans
        #[arg(long)]
        dry_run: bool,
    },
    /// Issue a bearer token for a user, worker or admin
    IssueToken {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "user")]
        role: String,
        /// Validity in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Issue a token without touching storage
pub fn issue_token(config: &Config, subject: &str, role: &str, hours: i64) -> Result<()> {
    if subject.trim().is_empty() {
        anyhow::bail!("--subject must not be empty");
    }
    if hours <= 0 {
        anyhow::bail!("--hours must be positive");
    }
    let role = UserRole::from_str(role)
        .ok_or_else(|| anyhow::anyhow!("--role must be one of user, worker, admin (got '{}')", role))?;
    let token = AuthService::issue_token(&config.jwt, subject, role, hours)
        .context("Failed to sign token")?;
    tracing::info!(subject, role = role.as_str(), hours, "Issued token");
    println!("{}", token);
    Ok(())
}

/// Run a one-shot storage command
pub async fn run(command: Command, config: &Config, services: &Services) -> Result<()> {
    match command {
        Command::Serve | Command::IssueToken { .. } => {
            anyhow::bail!("{:?} is not a storage command", command)
        }
        Command::Stats => print_json(&services.accountant.compute_usage().await?),
        Command::Report { top } => {
            if top <= 0 {
                anyhow::bail!("--top must be positive");
            }
            print_json(&services.reporter.storage_report(top).await?)
        }
        Command::Cleanup { target_percent } => {
            let target = target_fraction(target_percent, config.limits.target_after_cleanup_fraction)?;
            print_json(&services.reclamation.reclaim_to(target).await?)
        }
        Command::CleanupOrphaned { dry_run } => {
            let result = if dry_run {
                services.orphans.find_orphans().await?
            } else {
                services.orphans.reclaim_orphans().await?
            };
            print_json(&result)
        }
    }
}
