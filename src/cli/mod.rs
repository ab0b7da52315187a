//! # Command Line Interface
//!
//! `apply` reconciles manifests against Vault; `validate` only parses and checks them.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use output::OutputFormat;

use crate::config::AppConfig;
use crate::observability::{init_logging, log_config_info};

#[derive(Parser, Debug)]
#[command(name = "vault-reconcile")]
#[command(about = "Reconcile Vault passwords, password policies and PKI issuers from manifests")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile manifests against the backend
    Apply {
        /// Manifest files or directories; `-` or nothing reads stdin
        #[arg(short = 'f', long = "file")]
        files: Vec<PathBuf>,

        /// Descend into subdirectories
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Maximum discoveries and backend calls in flight (0 = unbounded)
        #[arg(long)]
        max_dispatch: Option<usize>,

        /// Reconcile against an in-memory backend instead of Vault
        #[arg(long)]
        dry_run: bool,

        /// Output format (table, json or yaml)
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Parse and validate manifests without contacting the backend
    Validate {
        /// Manifest files or directories; `-` or nothing reads stdin
        #[arg(short = 'f', long = "file")]
        files: Vec<PathBuf>,

        /// Descend into subdirectories
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Output format (table, json or yaml)
        #[arg(short, long, default_value = "table")]
        output: String,
    },
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Commands::Apply { max_dispatch: Some(limit), .. } = cli.command {
        config.dispatch.max_dispatch = limit;
        config.validate()?;
    }

    init_logging(&config.observability, cli.verbose);
    log_config_info(&config);

    match cli.command {
        Commands::Apply { files, recursive, dry_run, output: format, .. } => {
            let format = OutputFormat::parse(&format)?;
            commands::handle_apply_command(&config, &files, recursive, dry_run, format).await
        }
        Commands::Validate { files, recursive, output: format } => {
            let format = OutputFormat::parse(&format)?;
            commands::handle_validate_command(&files, recursive, format)
        }
    }
}
