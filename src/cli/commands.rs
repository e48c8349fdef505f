//! CLI command definitions and handlers

use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

use crate::context::AppContext;
use crate::core::config::AppConfig;
use crate::sync::{LockKey, RunOutcome};

/// Commands for the inbox AI router
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start HTTP API server
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Listen port
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },

    /// Import new messages from the spool directory
    SyncMail,

    /// Analyze pending messages
    ProcessAi {
        /// Maximum messages to analyze (default: AI_BATCH_LIMIT)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Analyze one message by id
    ProcessMessage {
        id: String,

        /// Re-analyze even if already completed
        #[arg(short, long)]
        force: bool,
    },

    /// Show lock status
    Status {
        /// messages or ai (default: both)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Force-release a lock
    Cancel {
        #[arg(short, long)]
        key: String,
    },

    /// Show today's token usage per model
    Usage,

    /// Estimate the token cost of a file
    Estimate { file: PathBuf },
}

/// Load configuration, wire services and run one command
pub async fn run(command: Commands) -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    if let Commands::Estimate { file } = &command {
        return handle_estimate(&config, file).await;
    }

    let ctx = AppContext::from_config(config)?;
    match command {
        Commands::Serve { host, port } => handle_serve(ctx, &host, port).await,
        Commands::SyncMail => handle_sync_mail(&ctx).await,
        Commands::ProcessAi { limit } => handle_process_ai(&ctx, limit).await,
        Commands::ProcessMessage { id, force } => handle_process_message(&ctx, &id, force).await,
        Commands::Status { key } => handle_status(&ctx, key).await,
        Commands::Cancel { key } => handle_cancel(&ctx, &key).await,
        Commands::Usage => handle_usage(&ctx).await,
        Commands::Estimate { .. } => Ok(()),
    }
}

fn spinner(message: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message.to_string());
    Ok(pb)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish<T: Serialize>(pb: ProgressBar, outcome: RunOutcome<T>, started: Instant) -> anyhow::Result<()> {
    if outcome.is_already_running() {
        pb.abandon_with_message("Already running");
        anyhow::bail!("another run holds the lock; try again later or cancel it");
    }
    if outcome.success {
        pb.finish_with_message(format!("Completed in {:?}", started.elapsed()));
    } else {
        pb.abandon_with_message("Failed");
    }
    print_json(&outcome)?;
    match outcome.error {
        Some(error) => anyhow::bail!(error),
        None => Ok(()),
    }
}

async fn handle_serve(ctx: AppContext, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Starting HTTP server on {}:{}", host, port);
    println!("🚀 Server starting on http://{}:{}", host, port);
    crate::server::api::run_server(ctx, host, port).await
}

async fn handle_sync_mail(ctx: &AppContext) -> anyhow::Result<()> {
    let started = Instant::now();
    let pb = spinner(&format!("Importing messages from {}", ctx.config.spool_dir.display()))?;
    let outcome = ctx.orchestrator.sync_messages_only().await;
    finish(pb, outcome, started)
}

async fn handle_process_ai(ctx: &AppContext, limit: Option<usize>) -> anyhow::Result<()> {
    let limit = limit.unwrap_or(ctx.config.batch_limit);
    let started = Instant::now();
    let pb = spinner(&format!("Analyzing up to {} pending messages", limit))?;
    let outcome = ctx.orchestrator.process_ai_only(limit).await;
    finish(pb, outcome, started)
}

async fn handle_process_message(ctx: &AppContext, id: &str, force: bool) -> anyhow::Result<()> {
    let pb = spinner(&format!("Analyzing message {}", id))?;
    let outcome = ctx.orchestrator.process_single_message_by_id(id, force).await?;
    pb.finish_and_clear();
    print_json(&outcome)?;
    match outcome.error {
        Some(error) => anyhow::bail!("analysis of {} failed: {}", id, error),
        None => Ok(()),
    }
}

async fn handle_status(ctx: &AppContext, key: Option<String>) -> anyhow::Result<()> {
    let keys = match key {
        Some(key) => vec![key.parse::<LockKey>()?],
        None => LockKey::ALL.to_vec(),
    };
    for key in keys {
        print_json(&ctx.orchestrator.get_sync_status(key).await?)?;
    }
    Ok(())
}

async fn handle_cancel(ctx: &AppContext, key: &str) -> anyhow::Result<()> {
    let key: LockKey = key.parse()?;
    if ctx.orchestrator.force_release_lock(key).await? {
        println!("✅ Released {} lock", key);
    } else {
        println!("Lock {} was not held", key);
    }
    Ok(())
}

async fn handle_usage(ctx: &AppContext) -> anyhow::Result<()> {
    let stats = ctx.router.usage_stats().await?;
    for model in &stats.models {
        let limit = model
            .limit
            .map_or_else(|| "unlimited".to_string(), |l| l.to_string());
        println!(
            "{:<40} {:>10} / {:<10} {:>3}% {}",
            model.model, model.used, limit, model.percentage, model.status
        );
    }
    println!(
        "\nTotal used: {}  available: {}  ({}%)",
        stats.summary.total_used, stats.summary.total_available, stats.summary.overall_percentage
    );
    Ok(())
}

async fn handle_estimate(config: &AppConfig, file: &Path) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(file).await?;
    let tokens = config.token_estimation.estimate(&text);
    println!("📄 {}", file.display());
    println!("   Characters: {}", text.chars().count());
    println!("   Estimated tokens: {}", tokens);

    let fitting: Vec<&str> = config
        .models
        .iter()
        .filter(|m| m.daily_token_limit.map_or(true, |limit| limit >= tokens))
        .map(|m| m.name.as_str())
        .collect();
    println!("   Models with enough daily budget: {}", fitting.len());
    for name in fitting {
        println!("     - {}", name);
    }
    Ok(())
}
