use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AiepError, Result};

/// Top-level configuration for the academic assistant backend.
///
/// Loaded from `~/.aiep/config.toml` by default. Every section is optional
/// in the file; missing sections and fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiepConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl AiepConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AiepConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AiepError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Full path of the SQLite database file, with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.storage.database_file)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Log output format: "pretty" or "json".
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.aiep/data".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// SQLite storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside `general.data_dir`.
    pub database_file: String,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Page cache size in KiB.
    pub cache_size_kib: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "aiep.db".to_string(),
            busy_timeout_ms: 5_000,
            cache_size_kib: 65_536,
        }
    }
}

/// Defaults applied by callers that do not specify search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result limit used when none is given.
    pub default_limit: usize,
    /// Minimum cosine similarity (0.0 disables the threshold).
    pub default_min_similarity: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            default_min_similarity: 0.0,
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = AiepConfig::default();
        assert_eq!(config.general.data_dir, "~/.aiep/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.storage.database_file, "aiep.db");
        assert_eq!(config.storage.busy_timeout_ms, 5_000);
        assert_eq!(config.storage.cache_size_kib, 65_536);
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.search.default_min_similarity, 0.0);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/srv/aiep"
log_level = "debug"
log_format = "json"

[storage]
database_file = "tutor.db"
busy_timeout_ms = 250
cache_size_kib = 1024

[search]
default_limit = 25
default_min_similarity = 0.75
"#;
        let file = create_temp_config(content);
        let config = AiepConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/srv/aiep");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.storage.database_file, "tutor.db");
        assert_eq!(config.storage.busy_timeout_ms, 250);
        assert_eq!(config.storage.cache_size_kib, 1024);
        assert_eq!(config.search.default_limit, 25);
        assert!((config.search.default_min_similarity - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = AiepConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.general.data_dir, "~/.aiep/data");
        assert_eq!(config.storage.busy_timeout_ms, 5_000);
        assert_eq!(config.search.default_limit, 10);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = AiepConfig::load(file.path()).unwrap();
        assert_eq!(config.storage.database_file, "aiep.db");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = AiepConfig::load(file.path());
        assert!(matches!(result, Err(AiepError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = AiepConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.aiep/data");
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AiepConfig::default();
        config.search.default_limit = 42;
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = AiepConfig::load(&path).unwrap();
        assert_eq!(reloaded.search.default_limit, 42);
        assert_eq!(reloaded.general.log_level, config.general.log_level);
    }

    #[test]
    fn test_database_path_joins_data_dir() {
        let mut config = AiepConfig::default();
        config.general.data_dir = "/var/lib/aiep".to_string();
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/aiep").join("aiep.db")
        );
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/data"), PathBuf::from("/tmp/data"));
        assert!(!expand_home("~/data").starts_with("~"));
    }
}
