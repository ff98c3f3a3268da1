//! Executor configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RSTCHART_CONFIG or --config)
//! 3. Environment variables

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default bound on microsteps per macrostep.
pub const DEFAULT_MAX_MICROSTEPS: usize = 1000;

/// Default number of reports retained per executor.
pub const DEFAULT_MAX_REPORTS: usize = 256;

/// What the executor does when a guard or action fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Report, raise `error.execution` and keep stepping.
    #[default]
    Skip,
    /// Report and end the macrostep with an error.
    Abort,
}

impl ErrorPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Some(ErrorPolicy::Skip),
            "abort" => Some(ErrorPolicy::Abort),
            _ => None,
        }
    }
}

/// Per-executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Microsteps allowed in one macrostep before the executor halts.
    pub max_microsteps: usize,
    /// Failure handling for guards and actions.
    pub error_policy: ErrorPolicy,
    /// Reports retained for `take_reports` (0 keeps none).
    pub max_reports: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_microsteps: DEFAULT_MAX_MICROSTEPS,
            error_policy: ErrorPolicy::Skip,
            max_reports: DEFAULT_MAX_REPORTS,
        }
    }
}

impl ExecutorConfig {
    /// Loads configuration from `path` (or the file named by `RSTCHART_CONFIG`
    /// when `path` is `None`), then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var("RSTCHART_CONFIG").ok().map(PathBuf::from);
        let mut config = match path.or(from_env.as_deref()) {
            Some(path) => {
                let config = Self::from_file(path)?;
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(max) = lookup("RSTCHART_MAX_MICROSTEPS") {
            if let Ok(n) = max.parse() {
                self.max_microsteps = n;
            }
        }

        if let Some(policy) = lookup("RSTCHART_ERROR_POLICY") {
            match ErrorPolicy::parse(&policy) {
                Some(p) => self.error_policy = p,
                None => tracing::warn!("ignoring unknown RSTCHART_ERROR_POLICY '{}'", policy),
            }
        }

        if let Some(max) = lookup("RSTCHART_MAX_REPORTS") {
            if let Ok(n) = max.parse() {
                self.max_reports = n;
            }
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_microsteps == 0 {
            return Err(ConfigError::Validation(
                "max_microsteps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_microsteps(mut self, max: usize) -> Self {
        self.max_microsteps = max;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_max_reports(mut self, max: usize) -> Self {
        self.max_reports = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_microsteps, 1000);
        assert_eq!(config.error_policy, ErrorPolicy::Skip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "error_policy: abort").unwrap();

        let config = ExecutorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
        assert_eq!(config.max_microsteps, DEFAULT_MAX_MICROSTEPS);
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_microsteps: 25").unwrap();

        let config = ExecutorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.max_microsteps, 25);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_microsteps: 0").unwrap();
        assert!(matches!(
            ExecutorConfig::load(Some(file.path())),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            ExecutorConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "max_microsteps: lots").unwrap();
        assert!(matches!(
            ExecutorConfig::from_file(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RSTCHART_MAX_MICROSTEPS", "50"),
            ("RSTCHART_ERROR_POLICY", "ABORT"),
            ("RSTCHART_MAX_REPORTS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ExecutorConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.max_microsteps, 50);
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
        assert_eq!(config.max_reports, DEFAULT_MAX_REPORTS);
    }

    #[test]
    fn test_validate_zero_microsteps() {
        let config = ExecutorConfig::default().with_max_microsteps(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ExecutorConfig::default()
            .with_error_policy(ErrorPolicy::Abort)
            .with_max_reports(4);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ExecutorConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
