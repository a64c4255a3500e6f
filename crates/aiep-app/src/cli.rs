//! CLI argument definitions for the `aiep` operator tool.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use aiep_core::EntityKind;
use clap::{Parser, Subcommand};

/// Operator tool for the academic assistant's embedding store.
#[derive(Parser, Debug)]
#[command(name = "aiep", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the database, apply pending migrations, and print the schema version.
    Migrate,

    /// Print live and vectorised row counts for every entity kind.
    Stats,

    /// Print the nearest neighbours of a stored entity.
    Similar {
        #[arg(long, value_parser = parse_kind)]
        kind: EntityKind,

        #[arg(long)]
        id: i64,

        /// Defaults to `search.default_limit` from the config file.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Rank stored entities against a query vector read from a JSON array file.
    Search {
        #[arg(long, value_parser = parse_kind)]
        kind: EntityKind,

        /// File holding the query vector, e.g. `[0.1, 0.2, ...]`.
        #[arg(long)]
        query: PathBuf,

        /// Defaults to `search.default_limit` from the config file.
        #[arg(long)]
        limit: Option<usize>,

        /// Defaults to `search.default_min_similarity` from the config file.
        #[arg(long)]
        min_similarity: Option<f32>,
    },

    /// Apply embeddings from a JSON-lines file of `{"id": N, "embedding": [...]}`.
    Import {
        #[arg(long, value_parser = parse_kind)]
        kind: EntityKind,

        file: PathBuf,
    },
}

fn parse_kind(s: &str) -> Result<EntityKind, String> {
    s.parse().map_err(|e: aiep_core::AiepError| e.to_string())
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > AIEP_CONFIG env var > ~/.aiep/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("AIEP_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// The `--data-dir` override, if given.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".aiep").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".aiep").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_similar() {
        let args = CliArgs::parse_from([
            "aiep", "similar", "--kind", "topic", "--id", "12", "--limit", "3",
        ]);
        match args.command {
            Command::Similar { kind, id, limit } => {
                assert_eq!(kind, EntityKind::Topic);
                assert_eq!(id, 12);
                assert_eq!(limit, Some(3));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::parse_from(["aiep", "stats", "--config", "/tmp/a.toml", "-l", "debug"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/a.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_parse_search() {
        let args = CliArgs::parse_from([
            "aiep", "search", "--kind", "insight", "--query", "q.json", "--min-similarity", "0.8",
        ]);
        match args.command {
            Command::Search { kind, query, limit, min_similarity } => {
                assert_eq!(kind, EntityKind::Insight);
                assert_eq!(query, PathBuf::from("q.json"));
                assert_eq!(limit, None);
                assert_eq!(min_similarity, Some(0.8));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = CliArgs::try_parse_from(["aiep", "import", "--kind", "course", "x.jsonl"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_data_dir_override() {
        let args = CliArgs::parse_from(["aiep", "-d", "/srv/aiep", "migrate"]);
        assert_eq!(args.resolve_data_dir().as_deref(), Some("/srv/aiep"));
    }
}
