// Scheduler Configuration
// YAML-backed settings with defaults and environment overrides

use crate::action::RecheckPolicy;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `max_parallel_matrices`
pub const ENV_MAX_PARALLEL: &str = "MTX_MAX_PARALLEL";

/// Environment variable overriding `log_level`
pub const ENV_LOG: &str = "MTX_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

/// Settings for a scheduler run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Matrices running at the same time; 0 means unbounded
    pub max_parallel_matrices: usize,
    /// Timeout for actions that neither they nor their step override
    pub default_action_timeout_ms: Option<u64>,
    pub recheck: RecheckPolicy,
    /// How long an asynchronous action may stay pending
    pub recheck_max_wait_ms: u64,
    pub log_level: String,
    /// Directory for per-matrix JSON reports
    pub report_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_matrices: 0,
            default_action_timeout_ms: None,
            recheck: RecheckPolicy::default(),
            recheck_max_wait_ms: 30_000,
            log_level: "info".to_string(),
            report_dir: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content, path)
    }

    /// Apply `MTX_MAX_PARALLEL` and `MTX_LOG` from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_PARALLEL) {
            self.max_parallel_matrices = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_MAX_PARALLEL,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            if !value.trim().is_empty() {
                self.log_level = value;
            }
        }
        Ok(self)
    }

    pub fn default_action_timeout(&self) -> Option<Duration> {
        self.default_action_timeout_ms.map(Duration::from_millis)
    }

    pub fn recheck_max_wait(&self) -> Duration {
        Duration::from_millis(self.recheck_max_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_parallel_matrices, 0);
        assert_eq!(config.recheck_max_wait(), Duration::from_secs(30));
        assert!(config.default_action_timeout().is_none());
    }

    #[test]
    fn test_from_file_with_partial_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "max_parallel_matrices: 2\ndefault_action_timeout_ms: 1500\nrecheck:\n  kind: fixed\n  interval_ms: 10\n"
        )
        .unwrap();

        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_parallel_matrices, 2);
        assert_eq!(config.default_action_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.recheck, RecheckPolicy::Fixed { interval_ms: 10 });
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = SchedulerConfig::from_yaml("max_parallel: 2\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [(ENV_MAX_PARALLEL, "4"), (ENV_LOG, "debug")].into_iter().collect();
        let config = SchedulerConfig::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_parallel_matrices, 4);
        assert_eq!(config.log_level, "debug");

        let bad = SchedulerConfig::default().with_overrides(|name| {
            (name == ENV_MAX_PARALLEL).then(|| "many".to_string())
        });
        assert!(matches!(bad, Err(ConfigError::InvalidEnv { .. })));
    }
}
