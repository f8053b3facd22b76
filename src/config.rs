//! `coopscout.toml` settings.
//!
//! ```toml
//! [backend]
//! kind = "sqlite"            # sqlite or supabase
//! database = "/path/to/coopscout.db"
//! supabase_url = "https://xyz.supabase.co"
//! supabase_anon_key = "..."
//!
//! [listing]
//! page_size = 21
//!
//! [logging]
//! level = "warn"             # error, warn, info, debug, trace
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::SqliteStore;
use crate::pager::DEFAULT_PAGE_SIZE;

const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Supabase,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub listing: ListingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// SQLite file; defaults to the platform data dir.
    pub database: Option<PathBuf>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Sqlite,
            database: None,
            supabase_url: None,
            supabase_anon_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub page_size: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "coopscout") {
            proj_dirs.config_dir().join("coopscout.toml")
        } else {
            PathBuf::from("coopscout.toml")
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// An explicit path must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(kind) = var("COOPSCOUT_BACKEND") {
            match kind.to_lowercase().as_str() {
                "sqlite" => self.backend.kind = BackendKind::Sqlite,
                "supabase" => self.backend.kind = BackendKind::Supabase,
                other => log::warn!("ignoring unknown COOPSCOUT_BACKEND '{}'", other),
            }
        }
        if let Some(url) = var("COOPSCOUT_SUPABASE_URL") {
            self.backend.supabase_url = Some(url);
        }
        if let Some(key) = var("COOPSCOUT_SUPABASE_ANON_KEY") {
            self.backend.supabase_anon_key = Some(key);
        }
        if let Some(path) = var("COOPSCOUT_DATABASE") {
            self.backend.database = Some(PathBuf::from(path));
        }
        if let Some(level) = var("COOPSCOUT_LOG") {
            self.logging.level = level.to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.listing.page_size == 0 {
            return Err(anyhow!("listing.page_size cannot be 0"));
        }
        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            ));
        }
        if self.backend.kind == BackendKind::Supabase {
            match &self.backend.supabase_url {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => return Err(anyhow!("supabase_url '{}' is not an http(s) URL", url)),
                None => return Err(anyhow!("backend.supabase_url is required for supabase")),
            }
            if self.backend.supabase_anon_key.as_deref().is_none_or(str::is_empty) {
                return Err(anyhow!("backend.supabase_anon_key is required for supabase"));
            }
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.backend
            .database
            .clone()
            .unwrap_or_else(SqliteStore::default_path)
    }

    /// Writes the built-in defaults to `path` unless a file is already there.
    /// Environment overrides are never persisted. Returns whether a file was
    /// written.
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(&Self::default()).context("Failed to encode config")?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.backend.kind, BackendKind::Sqlite);
        assert_eq!(config.listing.page_size, 21);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coopscout.toml");
        fs::write(&path, "[listing]\npage_size = 10\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.listing.page_size, 10);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_env_overrides_win() {
        let vars: HashMap<&str, &str> = [
            ("COOPSCOUT_BACKEND", "Supabase"),
            ("COOPSCOUT_SUPABASE_URL", "https://demo.supabase.co"),
            ("COOPSCOUT_SUPABASE_ANON_KEY", "anon"),
            ("COOPSCOUT_LOG", "DEBUG"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.backend.kind, BackendKind::Supabase);
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_supabase_requires_credentials() {
        let mut config = Config::default();
        config.backend.kind = BackendKind::Supabase;
        assert!(config.validate().is_err());

        config.backend.supabase_url = Some("demo.supabase.co".to_string());
        config.backend.supabase_anon_key = Some("anon".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut config = Config::default();
        config.listing.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_default_round_trips_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("coopscout.toml");

        assert!(Config::write_default(&path).unwrap());
        fs::write(&path, "[listing]\npage_size = 12\n").unwrap();
        assert!(!Config::write_default(&path).unwrap());

        assert_eq!(Config::from_file(&path).unwrap().listing.page_size, 12);
    }

    #[test]
    fn test_written_default_skips_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coopscout.toml");

        let mut loaded = Config::default();
        loaded.apply_overrides(|name| match name {
            "COOPSCOUT_BACKEND" => Some("supabase".to_string()),
            "COOPSCOUT_SUPABASE_URL" => Some("https://demo.supabase.co".to_string()),
            "COOPSCOUT_SUPABASE_ANON_KEY" => Some("one-off-key".to_string()),
            _ => None,
        });
        assert_eq!(loaded.backend.supabase_anon_key.as_deref(), Some("one-off-key"));

        assert!(Config::write_default(&path).unwrap());
        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("one-off-key"));

        let reread = Config::from_file(&path).unwrap();
        assert_eq!(reread.backend.kind, BackendKind::Sqlite);
        assert!(reread.backend.supabase_anon_key.is_none());
        assert!(reread.backend.supabase_url.is_none());
    }
}
