//! Process configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::spool::Spool;

use super::validation::{ConfigError, env_nonempty, expand_env_vars, expand_home};

// =============================================================================
// Constants
// =============================================================================

/// Default spool root.
pub const DEFAULT_SPOOL_DIR: &str = "~/.homelab-monitoring/spool";

/// Default remote container.
pub const DEFAULT_CONTAINER: &str = "homelab-telemetry";

/// Default environment tag stamped on every record.
pub const DEFAULT_ENVIRONMENT: &str = "homelab";

/// Default directory holding job definitions.
pub const DEFAULT_CONFIGS_DIR: &str = "configs";

/// Default remote request timeout (10 seconds).
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default scheduler tick (5 seconds).
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Default number of concurrent job runs.
pub const DEFAULT_WORKERS: usize = 5;

/// Default wait for in-flight runs on shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable overriding the spool root.
pub const ENV_SPOOL_DIR: &str = "SPOOL_DIR";
/// Environment variable holding the remote connection string.
pub const ENV_CONNECTION_STRING: &str = "AZURE_STORAGE_CONNECTION_STRING";
/// Environment variable overriding the remote container.
pub const ENV_CONTAINER: &str = "AZURE_BLOB_CONTAINER";
/// Environment variable overriding the environment tag.
pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";

// =============================================================================
// Spool Configuration
// =============================================================================

/// Local spool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Spool root directory; a leading `~` is expanded.
    pub root: PathBuf,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_SPOOL_DIR),
        }
    }
}

// =============================================================================
// Remote Configuration
// =============================================================================

/// Remote object store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Connection string; `None` disables upload.
    pub connection_string: Option<String>,

    /// Container holding the append-only objects.
    pub container: String,

    /// Per-request timeout (default: 10s).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            container: DEFAULT_CONTAINER.to_string(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Directory scanned for `*.yaml` / `*.yml` job definitions.
    pub configs_dir: PathBuf,

    /// Tick period (default: 5s).
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// Concurrent job runs (default: 5).
    pub workers: usize,

    /// Wait for in-flight runs on shutdown (default: 5s).
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            configs_dir: PathBuf::from(DEFAULT_CONFIGS_DIR),
            tick: DEFAULT_TICK,
            workers: DEFAULT_WORKERS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local spool.
    pub spool: SpoolConfig,

    /// Remote object store.
    pub remote: RemoteConfig,

    /// Environment tag (default: "homelab").
    pub environment: String,

    /// Scheduler.
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            spool: SpoolConfig::default(),
            remote: RemoteConfig::default(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    /// Returns `ConfigError` if the text cannot be parsed or validated.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let mut config: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise start from defaults, then
    /// apply environment overrides.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be loaded or the result is
    /// invalid.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Apply process environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(dir) = env_nonempty(ENV_SPOOL_DIR) {
            self.spool.root = PathBuf::from(dir);
        }
        if let Some(conn) = env_nonempty(ENV_CONNECTION_STRING) {
            self.remote.connection_string = Some(conn);
        }
        if let Some(container) = env_nonempty(ENV_CONTAINER) {
            self.remote.container = container;
        }
        if let Some(environment) = env_nonempty(ENV_ENVIRONMENT) {
            self.environment = environment;
        }
    }

    fn normalize(&mut self) {
        self.spool.root = expand_home(&self.spool.root.to_string_lossy());
        self.scheduler.configs_dir = expand_home(&self.scheduler.configs_dir.to_string_lossy());
        if self
            .remote
            .connection_string
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            self.remote.connection_string = None;
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spool.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "spool root cannot be empty".to_string(),
            ));
        }

        if self.remote.container.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "remote container cannot be empty".to_string(),
            ));
        }

        if self.remote.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "remote timeout must be positive".to_string(),
            ));
        }

        if self.scheduler.tick.is_zero() {
            return Err(ConfigError::ValidationError(
                "scheduler tick must be positive".to_string(),
            ));
        }

        if self.scheduler.workers == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler workers must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Spool handle for the configured root.
    pub fn spool(&self) -> Spool {
        Spool::new(self.spool.root.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.remote.container, DEFAULT_CONTAINER);
        assert_eq!(config.environment, DEFAULT_ENVIRONMENT);
        assert_eq!(config.scheduler.tick, DEFAULT_TICK);
        assert_eq!(config.scheduler.workers, DEFAULT_WORKERS);
        assert!(config.remote.connection_string.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = AppConfig::from_yaml_str(
            r#"
spool:
  root: /var/spool/homespool
remote:
  container: telemetry
  timeout: 30s
scheduler:
  tick: 2s
"#,
        )
        .unwrap();

        assert_eq!(config.spool.root, PathBuf::from("/var/spool/homespool"));
        assert_eq!(config.remote.container, "telemetry");
        assert_eq!(config.remote.timeout, Duration::from_secs(30));
        assert_eq!(config.scheduler.tick, Duration::from_secs(2));
        assert_eq!(config.scheduler.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn test_empty_connection_string_disables_remote() {
        let config = AppConfig::from_yaml_str(
            "remote:\n  connection_string: \"${HOMESPOOL_UNSET_CONN_4242:-}\"\n",
        )
        .unwrap();
        assert!(config.remote.connection_string.is_none());
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = AppConfig::from_yaml_str("").unwrap();
        assert_eq!(config.remote.container, DEFAULT_CONTAINER);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let result = AppConfig::from_yaml_str("scheduler:\n  workers: 0\n");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("scheduler workers must be positive")
        );
    }

    #[test]
    fn test_validation_rejects_empty_container() {
        let mut config = AppConfig::default();
        config.remote.container = " ".to_string();
        assert!(config.validate().is_err());
    }
}
