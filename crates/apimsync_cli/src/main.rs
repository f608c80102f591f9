//! apimsync CLI
//!
//! Command-line front end for the apimsync reconciliation engine.
//!
//! Runs a pass described by a deployment manifest against a platform whose
//! state is kept in a JSON file, so a deployment can be rehearsed offline.
//!
//! # Commands
//!
//! - `list` - Show the deployment status of every definition
//! - `deploy` - Create, update and publish every definition
//! - `remove` - Delete every definition and its backend certificates
//! - `certs` - Show the stored backend certificates

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Declarative API-management deployments.
#[derive(Parser)]
#[command(name = "apimsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the deployment manifest
    #[arg(global = true, short, long)]
    manifest: Option<PathBuf>,

    /// Path to the platform state file (created if missing)
    #[arg(global = true, short, long)]
    state: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the deployment status of every definition
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Create, update and publish every definition
    Deploy {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete every definition and its backend certificates
    Remove {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the stored backend certificates of every definition
    Certs {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("apimsync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("apimsync Core v{}", apimsync_core::VERSION);
        return Ok(());
    }

    let manifest = cli.manifest.ok_or("Manifest path required")?;
    let state = cli.state.ok_or("State file path required")?;
    let workspace = commands::Workspace::open(&manifest, &state)?;

    match cli.command {
        Commands::List { format } => commands::list::run(&workspace, &format).await?,
        Commands::Deploy { format } => commands::deploy::run(&workspace, &format).await?,
        Commands::Remove { format } => commands::remove::run(&workspace, &format).await?,
        Commands::Certs { format } => commands::certs::run(&workspace, &format).await?,
        Commands::Version => {}
    }

    Ok(())
}
