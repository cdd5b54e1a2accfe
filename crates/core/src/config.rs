//! Configuration for the yaks workspace.
//!
//! Everything is optional: a work tree without a `.yaks.toml` gets the
//! defaults below. The file lives at the root of the git work tree.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

/// Name of the per-work-tree configuration file.
pub const CONFIG_FILE_NAME: &str = ".yaks.toml";

/// Environment variable that overrides `[log] level`.
pub const LOG_LEVEL_ENV: &str = "YX_LOG_LEVEL";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration, mirroring the TOML file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YaksConfig {
    /// Where the task tree lives inside the work tree.
    #[serde(default)]
    pub store: StoreConfig,

    /// Refs and remote used by `sync`.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Committer identity for snapshots.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Task tree directory, relative to the work tree (default `.yaks`).
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,

    /// Refuse to run when the task directory is not gitignored.
    #[serde(default = "default_true")]
    pub require_gitignore: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            require_gitignore: true,
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".yaks")
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote to fetch from and push to (default `origin`).
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Ref holding the last synchronized snapshot.
    #[serde(default = "default_sync_ref")]
    pub sync_ref: String,

    /// Local ref the remote pointer is fetched into; discarded after sync.
    #[serde(default = "default_tracking_ref")]
    pub tracking_ref: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            sync_ref: default_sync_ref(),
            tracking_ref: default_tracking_ref(),
        }
    }
}

fn default_remote() -> String {
    "origin".into()
}

fn default_sync_ref() -> String {
    "refs/notes/yaks".into()
}

fn default_tracking_ref() -> String {
    "refs/remotes/origin/yaks".into()
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Signature used for snapshot commits. Unset fields fall back to the
/// repository's `user.name` / `user.email`, then to `yx`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".into()
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl YaksConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: YaksConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load `<work_tree>/.yaks.toml` if present, else defaults. Applies the
    /// `YX_LOG_LEVEL` override and validates the result.
    pub fn load_or_default(work_tree: &Path) -> Result<Self, ConfigError> {
        let path = work_tree.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            if !level.trim().is_empty() {
                self.log.level = level.trim().to_lowercase();
            }
        }
    }

    /// Validate the configuration for obvious mistakes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.dir".into(),
                detail: "task directory must not be empty".into(),
            });
        }
        if self.store.dir.is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "store.dir".into(),
                detail: "task directory must be relative to the work tree".into(),
            });
        }
        if self.sync.remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        for (field, value) in [
            ("sync.sync_ref", &self.sync.sync_ref),
            ("sync.tracking_ref", &self.sync.tracking_ref),
        ] {
            if !value.starts_with("refs/") {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: format!("'{}' must be a full ref name starting with refs/", value),
                });
            }
        }
        if self.sync.sync_ref == self.sync.tracking_ref {
            return Err(ConfigError::InvalidValue {
                field: "sync.tracking_ref".into(),
                detail: "tracking ref must differ from the sync ref".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            warn!(level = %self.log.level, "unknown log level, tracing filter may reject it");
        }
        Ok(())
    }

    /// Absolute task directory for a given work tree.
    pub fn tree_root(&self, work_tree: &Path) -> PathBuf {
        work_tree.join(&self.store.dir)
    }

    /// Generate a commented configuration template.
    pub fn default_template() -> &'static str {
        r#"# yaks configuration (optional). Place at the root of the work tree.

[store]
dir = ".yaks"
require_gitignore = true

[sync]
remote = "origin"
sync_ref = "refs/notes/yaks"
tracking_ref = "refs/remotes/origin/yaks"

[identity]
# name = "Your Name"
# email = "you@example.com"

[log]
level = "warn"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = YaksConfig::default();
        assert_eq!(config.store.dir, PathBuf::from(".yaks"));
        assert!(config.store.require_gitignore);
        assert_eq!(config.sync.remote, "origin");
        assert_eq!(config.sync.sync_ref, "refs/notes/yaks");
        assert_eq!(config.sync.tracking_ref, "refs/remotes/origin/yaks");
        assert_eq!(config.log.level, "warn");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_template() {
        let config: YaksConfig = toml::from_str(YaksConfig::default_template()).unwrap();
        assert_eq!(config.store.dir, PathBuf::from(".yaks"));
        assert!(config.identity.name.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml_str = r#"
[sync]
remote = "upstream"
"#;
        let config: YaksConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.remote, "upstream");
        assert_eq!(config.sync.sync_ref, "refs/notes/yaks");
        assert_eq!(config.store.dir, PathBuf::from(".yaks"));
    }

    #[test]
    fn test_validate_rejects_bad_refs() {
        let mut config = YaksConfig::default();
        config.sync.sync_ref = "notes/yaks".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sync.sync_ref"
        ));

        let mut config = YaksConfig::default();
        config.sync.tracking_ref = config.sync.sync_ref.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_absolute_dir() {
        let mut config = YaksConfig::default();
        config.store.dir = PathBuf::from("/tmp/yaks");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = YaksConfig::load_from_file("/nonexistent/.yaks.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_from_file_and_tree_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[store]\ndir = \"tasks\"\nrequire_gitignore = false\n",
        )
        .unwrap();
        let config = YaksConfig::load_from_file(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert!(!config.store.require_gitignore);
        assert_eq!(config.tree_root(dir.path()), dir.path().join("tasks"));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[store\n").unwrap();
        assert!(matches!(
            YaksConfig::load_from_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }
}
