//! `aiep` operator binary.
//!
//! 1. Parse arguments and resolve the config file
//! 2. Initialize tracing (RUST_LOG > --log-level > config)
//! 3. Open the database, applying pending migrations
//! 4. Run one subcommand; Ctrl-C cancels it

mod cli;
mod commands;

use std::sync::Arc;

use aiep_core::config::AiepConfig;
use aiep_storage::Database;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command};

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = AiepConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    // Tracing.
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.general.log_level.clone());
    init_tracing(&level, &config.general.log_format);
    tracing::debug!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let db_path = config.database_path();
    let db = Arc::new(Database::new(&db_path, &config.storage)?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let result = match args.command {
        Command::Migrate => commands::migrate(&db),
        Command::Stats => commands::stats(&db, &cancel).await,
        Command::Similar { kind, id, limit } => {
            let limit = limit.unwrap_or(config.search.default_limit);
            commands::similar(&db, kind, id, limit, &cancel).await
        }
        Command::Search {
            kind,
            query,
            limit,
            min_similarity,
        } => {
            let params = commands::SearchParams {
                limit: limit.unwrap_or(config.search.default_limit),
                min_similarity: min_similarity.unwrap_or(config.search.default_min_similarity),
            };
            commands::search(&db, kind, &query, params, &cancel).await
        }
        Command::Import { kind, file } => commands::import(&db, kind, &file, &cancel).await,
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }
    result.map_err(Into::into)
}
