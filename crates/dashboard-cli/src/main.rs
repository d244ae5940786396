//! Dashboard CLI - manage dashboard records from the terminal.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_config::{init_logging, Config, LogOptions, Paths};
use commands::Context;
use optimistic_mutations::{Decision, Document, Meeting, Resource, Task};
use output::OutputFormat;
use std::path::PathBuf;
use tracing::debug;

/// Dashboard CLI - tasks, documents, meetings and decisions.
#[derive(Parser)]
#[command(name = "dashboard")]
#[command(about = "Dashboard CLI for authentication and record management")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with username and password
    Login {
        /// Username (prompted when omitted)
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Logout and clear the stored session
    Logout,

    /// Check authentication status
    Status,

    /// Manage tasks
    Tasks {
        #[command(subcommand)]
        command: ResourceCommands,
    },

    /// Manage documents
    Documents {
        #[command(subcommand)]
        command: ResourceCommands,
    },

    /// Manage meetings
    Meetings {
        #[command(subcommand)]
        command: ResourceCommands,
    },

    /// Manage decisions
    Decisions {
        #[command(subcommand)]
        command: ResourceCommands,
    },
}

#[derive(Subcommand)]
enum ResourceCommands {
    /// List records
    List,
    /// Create a record
    Create {
        /// Record fields as a JSON object
        #[arg(long)]
        json: String,
        /// File to upload with the record (sent as multipart)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Update fields of a record
    Update {
        /// Record ID
        id: String,
        /// Fields to change as a JSON object
        #[arg(long)]
        json: String,
    },
    /// Delete a record
    Delete {
        /// Record ID
        id: String,
    },
}

async fn run_resource<T: Resource>(
    ctx: &Context,
    command: ResourceCommands,
    format: &OutputFormat,
) -> Result<()> {
    match command {
        ResourceCommands::List => commands::list::<T>(ctx, format).await,
        ResourceCommands::Create { json, file } => {
            commands::create::<T>(ctx, &json, file.as_deref(), format).await
        }
        ResourceCommands::Update { id, json } => commands::update::<T>(ctx, &id, &json, format).await,
        ResourceCommands::Delete { id } => commands::delete::<T>(ctx, &id, format).await,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_logging(&LogOptions::new(level).with_log_file(paths.log_file()))?;
    debug!(api_url = %config.api_url, "Configuration loaded");

    let ctx = Context::new(paths, config)?;
    let format = &cli.format;

    match cli.command {
        Commands::Login { username } => commands::login(&ctx, username, format).await,
        Commands::Logout => commands::logout(&ctx, format),
        Commands::Status => commands::status(&ctx, format),
        Commands::Tasks { command } => run_resource::<Task>(&ctx, command, format).await,
        Commands::Documents { command } => run_resource::<Document>(&ctx, command, format).await,
        Commands::Meetings { command } => run_resource::<Meeting>(&ctx, command, format).await,
        Commands::Decisions { command } => run_resource::<Decision>(&ctx, command, format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e), &format);
        std::process::exit(1);
    }
}
