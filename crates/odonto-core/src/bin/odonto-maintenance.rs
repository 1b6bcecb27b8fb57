//! Scheduled maintenance for an OdontoCore database.
//!
//! ## Commands
//!
//! - `odonto-maintenance expire-accounts` - deactivate accounts past their validity date
//! - `odonto-maintenance backup` - write a timestamped copy of the database
//! - `odonto-maintenance all` - both, in that order
//!
//! Meant to be run from cron (daily expiry, nightly backup).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use odonto_core::{jobs, telemetry, Config, Database};

#[derive(Parser)]
#[command(name = "odonto-maintenance")]
#[command(about = "Scheduled maintenance jobs for the clinic database")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "ODONTO_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database path from the configuration
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deactivate accounts whose validity date has passed
    ExpireAccounts,
    /// Copy the database into the backup directory
    Backup {
        /// Target directory, defaults to the configured one
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Run every job
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("Failed to initialize tracing")?;

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let db_path = cli.database.unwrap_or_else(|| config.database.path.clone());
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    info!(path = %db_path.display(), "Database opened");

    match cli.command {
        Commands::ExpireAccounts => expire_accounts(&db)?,
        Commands::Backup { dir } => backup(&db, dir.unwrap_or(config.backup.dir))?,
        Commands::All => {
            expire_accounts(&db)?;
            backup(&db, config.backup.dir)?;
        }
    }
    Ok(())
}

fn expire_accounts(db: &Database) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    let count = jobs::deactivate_expired_accounts(db, today).context("Account expiry failed")?;
    println!("Deactivated {} expired account(s)", count);
    Ok(())
}

fn backup(db: &Database, dir: PathBuf) -> Result<()> {
    let report = jobs::backup_database(db, &dir, chrono::Local::now().naive_local())
        .with_context(|| format!("Backup into {} failed", dir.display()))?;
    println!(
        "Backup written to {} ({} bytes)",
        report.path.display(),
        report.size_bytes
    );
    Ok(())
}
