//! shipsync configuration file parsing (.shipsync.toml)

use std::path::{Path, PathBuf};

use crate::archive::DEFAULT_ARCHIVE_EXTENSIONS;
use crate::error::{Result, SyncError};

/// Config file name, looked up at the synchronization root
pub const CONFIG_FILE: &str = ".shipsync.toml";

/// Directory under the synchronization root holding tool state
pub const STATE_DIR: &str = ".shipsync";

/// Baseline file name inside [`STATE_DIR`]
pub const BASELINE_FILE: &str = "baseline.snap";

/// shipsync project configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// File extensions fingerprinted through their entry table
    pub archive_extensions: Vec<String>,

    /// Glob patterns (relative to the root) left out of the snapshot
    pub exclude: Vec<String>,

    /// Upper bound on fingerprinting threads (default: available parallelism)
    pub concurrency: Option<usize>,

    /// Baseline location; relative paths resolve against the root
    pub baseline: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            exclude: Vec::new(),
            concurrency: None,
            baseline: None,
        }
    }
}

impl SyncConfig {
    /// Load config from the synchronization root.
    ///
    /// Returns default config if .shipsync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&config_path).map_err(|e| SyncError::io(&config_path, e))?;
        let config: Self = toml::from_str(&content).map_err(|e| SyncError::Config {
            path: config_path.clone(),
            details: e.to_string(),
        })?;

        if config.concurrency == Some(0) {
            return Err(SyncError::Config {
                path: config_path,
                details: "concurrency must be at least 1".to_string(),
            });
        }
        Ok(config)
    }

    /// Where the baseline for `root` lives
    #[must_use]
    pub fn baseline_path(&self, root: &Path) -> PathBuf {
        match &self.baseline {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(STATE_DIR).join(BASELINE_FILE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
archive_extensions = ["jar", "war"]
exclude = ["*.log", "tmp/**"]
concurrency = 4
baseline = "/var/lib/shipsync/app.snap"
"#;

        let config: SyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.archive_extensions, vec!["jar", "war"]);
        assert_eq!(config.exclude.len(), 2);
        assert_eq!(config.concurrency, Some(4));
        assert_eq!(
            config.baseline_path(Path::new("/srv/app")),
            PathBuf::from("/var/lib/shipsync/app.snap")
        );
    }

    #[test]
    fn test_parse_empty_config() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.archive_extensions, vec!["jar"]);
        assert_eq!(
            config.baseline_path(Path::new("/srv/app")),
            PathBuf::from("/srv/app/.shipsync/baseline.snap")
        );
    }

    #[test]
    fn test_relative_baseline_resolves_against_root() {
        let config: SyncConfig = toml::from_str(r#"baseline = "state/base.snap""#).unwrap();
        assert_eq!(
            config.baseline_path(Path::new("/srv/app")),
            PathBuf::from("/srv/app/state/base.snap")
        );
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SyncConfig::load(dir.path()).unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_load_rejects_unknown_keys_and_zero_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "colour = \"blue\"\n").unwrap();
        assert!(matches!(
            SyncConfig::load(dir.path()),
            Err(SyncError::Config { .. })
        ));

        std::fs::write(dir.path().join(CONFIG_FILE), "concurrency = 0\n").unwrap();
        assert!(matches!(
            SyncConfig::load(dir.path()),
            Err(SyncError::Config { .. })
        ));
    }
}
