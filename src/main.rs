//! Main entry point for the inbox AI router CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use inbox_ai_router::cli::commands::{self, Commands};

/// Inbox AI Router - usage-metered LLM routing for message analysis
#[derive(Parser, Debug)]
#[command(name = "inbox-ai-router", version, about, long_about = None)]
struct Args {
    /// JSON or YAML config file (overrides AI_CONFIG_FILE)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("inbox_ai_router={}", level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = &args.config {
        std::env::set_var("AI_CONFIG_FILE", path);
    }

    match args.command {
        Some(command) => commands::run(command).await?,
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
