//! Configuration loading and validation.
//!
//! Two kinds of files are read:
//! - the optional process configuration ([`AppConfig`]): spool root, remote
//!   store, environment tag, scheduler settings
//! - one job definition per YAML file ([`JobDefinition`]) in the configs
//!   directory

mod app;
mod job;
mod validation;

pub use app::{AppConfig, RemoteConfig, SchedulerConfig, SpoolConfig};
pub use job::{
    AuthConfig, CollectConfig, CollectMode, HttpSettings, JobConfig, JobDefinition,
    ScheduleConfig, StorageConfig,
};
pub use validation::{ConfigError, expand_env_vars, expand_home, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_CONTAINER, DEFAULT_ENVIRONMENT, DEFAULT_REMOTE_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
    DEFAULT_SPOOL_DIR, DEFAULT_TICK, DEFAULT_WORKERS, ENV_CONNECTION_STRING, ENV_CONTAINER,
    ENV_ENVIRONMENT, ENV_SPOOL_DIR,
};
pub use job::DEFAULT_HTTP_TIMEOUT_SECS;
pub(crate) use validation::env_nonempty;
