//! AutoDBAudit CLI
//!
//! Offline security auditor and remediator for fleets of SQL Server
//! instances. Alternates between AUDIT (collect facts, write history, emit
//! report) and SYNC (re-audit, diff against baseline, merge operator
//! edits); REMEDIATE reads the history and emits reviewable scripts.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "autodbaudit")]
#[command(version)]
#[command(about = "Offline SQL Server security auditor and remediator")]
#[command(long_about = "
AutoDBAudit - offline SQL Server security auditor

Inventories security-relevant state across a fleet (logins, roles,
configuration, databases, permissions, backups, audit settings and more),
classifies every fact against policy, keeps a cumulative history across
runs, and round-trips operator annotations through the report.

Examples:
  autodbaudit audit --config ./config/prod.toml
  autodbaudit sync
  autodbaudit remediate --level 2
  autodbaudit finalize --force
  autodbaudit status
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new audit against every configured target
    Audit {
        /// Override the configured organization name
        #[arg(short, long)]
        organization: Option<String>,

        /// Override the configured output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Reconcile an operator-edited report against the history
    Sync {
        /// Report to reconcile; defaults to the latest report
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Generate remediation scripts from the latest completed run
    Remediate {
        /// Aggressiveness level: 1 review-only, 2 low-risk active, 3 all active
        #[arg(short, long)]
        level: Option<u8>,

        /// Print what would be generated without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Freeze a completed run for archival
    Finalize {
        /// Run id; defaults to the latest completed run
        #[arg(long)]
        run: Option<i64>,

        /// Finalize even while active issues remain
        #[arg(long)]
        force: bool,
    },

    /// Unfreeze a finalized run
    Definalize {
        /// Run id; defaults to the latest completed run
        #[arg(long)]
        run: Option<i64>,
    },

    /// Show the stats projection for the latest run
    Status,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Audit {
            organization,
            output_dir,
        } => commands::audit::run(cli.config.as_deref(), organization, output_dir).await,
        Commands::Sync { report } => commands::sync::run(cli.config.as_deref(), report).await,
        Commands::Remediate { level, dry_run } => {
            commands::remediate::run(cli.config.as_deref(), level, dry_run).await
        }
        Commands::Finalize { run, force } => {
            commands::finalize::run(cli.config.as_deref(), run, force, true).await
        }
        Commands::Definalize { run } => {
            commands::finalize::run(cli.config.as_deref(), run, false, false).await
        }
        Commands::Status => commands::status::run(cli.config.as_deref()).await,
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e.diagnosis());
            process::exit(e.exit_code());
        }
    }
}
