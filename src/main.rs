use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use codebase_context_engine::cli::{self, Command};
use codebase_context_engine::config::Config;
use codebase_context_engine::context::ContextMode;
use codebase_context_engine::document::{Document, Position};
use codebase_context_engine::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    let args = std::env::args().collect::<Vec<_>>();
    if cli::wants_help(&args) {
        cli::print_help();
        return Ok(());
    }
    if cli::wants_version(&args) {
        cli::print_version();
        return Ok(());
    }

    let command = cli::parse_command(&args)?;
    let config = Config::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = command.name(),
        "Starting codebase-context-engine"
    );

    if let Err(err) = run(config, command).await {
        error!(error = %err, "Exited with error");
        return Err(err);
    }
    Ok(())
}

/// Stderr logging, plus a daily-rolling file under `log_dir` when set. The
/// returned guard flushes the file writer and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "codebase-context-engine.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

async fn run(config: Config, command: Command) -> Result<()> {
    debug!(
        base_dir = %config.base_dir.display(),
        vector_db_path = %config.vector_db_path.display(),
        embeddings_backend = ?config.embeddings_backend,
        syntax_strategy = ?config.syntax_strategy,
        "Configuration loaded"
    );

    let engine = Engine::open(config).await?;

    match command {
        Command::Index => {
            let cancel = cancel_on_ctrl_c();
            let outcome = engine
                .index_all(
                    |p| debug!(processed = p.processed, total = p.total, "Index progress"),
                    &cancel,
                )
                .await?;
            print_json(&outcome)
        }
        Command::Search { query, limit } => {
            let hits = engine.find_relevant_code(&query, limit).await?;
            print_json(&hits)
        }
        Command::Context { file, line, column } => {
            let path = engine.config().normalize_path_to_base(&file);
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let key = engine.coordinator().index_key(&path)?;
            let doc = Document::new(key, 0, text);
            let pos = Position::new(line - 1, column - 1);
            let context = engine
                .assemble_context(&doc, pos, ContextMode::Full)
                .await?;
            print_json(&context)
        }
        Command::Watch => {
            let cancel = cancel_on_ctrl_c();
            let outcome = engine
                .index_all(
                    |p| debug!(processed = p.processed, total = p.total, "Index progress"),
                    &cancel,
                )
                .await?;
            info!(stats = ?outcome.stats(), "Initial index finished");
            if cancel.is_cancelled() {
                return Ok(());
            }

            let watch = engine.spawn_watch()?;
            cancel.cancelled().await;
            info!("Stopping watcher");
            watch.stop();
            Ok(())
        }
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            child.cancel();
        }
    });
    token
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
