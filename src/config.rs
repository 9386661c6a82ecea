//! Configuration system for tka.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - Sensible defaults built into the binary
//! 2. **User config file** - `~/.config/tka/config.toml`
//! 3. **Environment variables** - `TKA_*` prefix
//! 4. **CLI arguments** - Highest priority, always wins
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/tka/tka.db"
//!
//! [import]
//! default_user = "admin"
//! policy = "skip"
//!
//! [output]
//! format = "text"
//! colors = true
//! ```

use crate::importer::DuplicatePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Main configuration structure for tka.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path-related configuration.
    pub paths: PathsConfig,
    /// Import behavior configuration.
    pub import: ImportConfig,
    /// Output formatting configuration.
    pub output: OutputConfig,
}

/// Path configuration for the database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the `SQLite` database file.
    /// Environment variable: `TKA_DB`
    pub db: Option<PathBuf>,
}

/// Import behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Default target user when `--user` is not given.
    /// Environment variable: `TKA_USER`
    pub default_user: String,

    /// Default duplicate policy for imports.
    pub policy: DuplicatePolicy,
}

/// Output formatting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format: text, json, json-pretty.
    pub format: String,

    /// Enable colored output.
    pub colors: bool,

    /// Suppress non-essential output (progress bars, etc.).
    pub quiet: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_user: "admin".to_string(),
            policy: DuplicatePolicy::Skip,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            colors: true,
            quiet: false,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. User config file (~/.config/tka/config.toml)
    /// 3. Compiled defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load from user config file
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Override from environment variables
        config.apply_env_overrides();

        debug!("Configuration loaded: {:?}", config);
        config
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &PathBuf) -> Option<Self> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from: {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load the user configuration file from the standard location.
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tka").join("config.toml"))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(db) = std::env::var("TKA_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }
        if let Ok(user) = std::env::var("TKA_USER") {
            self.import.default_user = user;
        }
        if let Ok(format) = std::env::var("TKA_FORMAT") {
            self.output.format = format;
        }
        if std::env::var("TKA_NO_COLOR").is_ok() || std::env::var("NO_COLOR").is_ok() {
            self.output.colors = false;
        }
        if std::env::var("TKA_QUIET").is_ok() {
            self.output.quiet = true;
        }
    }

    /// Merge another config into this one (other takes precedence).
    fn merge(&mut self, other: Self) {
        if other.paths.db.is_some() {
            self.paths.db = other.paths.db;
        }

        self.import.default_user = other.import.default_user;
        self.import.policy = other.import.policy;

        self.output.format = other.output.format;
        self.output.colors = other.output.colors;
        self.output.quiet = other.output.quiet;
    }

    /// Get the database path, using defaults if not configured.
    pub fn db_path(&self) -> PathBuf {
        self.paths.db.clone().unwrap_or_else(crate::default_db_path)
    }

    /// Save the current configuration to the user config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined,
    /// the parent directory cannot be created, or the file cannot be written.
    pub fn save(&self) -> std::io::Result<()> {
        let config_path = Self::user_config_path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            )
        })?;

        // Create parent directory if needed
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&config_path, content)?;
        info!("Saved config to: {}", config_path.display());
        Ok(())
    }

    /// Generate a default configuration file content.
    #[must_use]
    pub fn default_config_content() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.import.default_user, "admin");
        assert_eq!(config.import.policy, DuplicatePolicy::Skip);
        assert!(config.output.colors);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.import.default_user, parsed.import.default_user);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.import.default_user = "creator".to_string();
        other.paths.db = Some(PathBuf::from("/custom/path"));

        base.merge(other);

        assert_eq!(base.import.default_user, "creator");
        assert_eq!(base.paths.db, Some(PathBuf::from("/custom/path")));
    }

    #[test]
    fn test_policy_roundtrips_kebab_case() {
        let toml = "[import]\npolicy = \"clear-then-import\"\n";
        let parsed: Config = toml::from_str(toml).unwrap();
        assert_eq!(parsed.import.policy, DuplicatePolicy::ClearThenImport);
    }

    #[test]
    fn test_default_config_content() {
        let content = Config::default_config_content();
        assert!(content.contains("[paths]"));
        assert!(content.contains("[import]"));
        assert!(content.contains("[output]"));
    }
}
