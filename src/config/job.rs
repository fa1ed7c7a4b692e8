//! Job definitions.
//!
//! One YAML file describes one polling job. Loading parses the file into a
//! [`Document`], seeds an interpolation [`Context`] from the `collect` block,
//! resolves every string leaf leniently (so `{node}` is filled in while
//! `{id}` survives until item time), then deserializes the typed
//! [`JobConfig`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::interpolate::{Context, Document, Mode};
use crate::spool::{BronzePath, expand_path_template};

use super::validation::ConfigError;

/// Default HTTP timeout for job fetches.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

fn default_schema_version() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_bronze_prefix() -> String {
    "bronze".to_string()
}

fn default_proxmox_token_id_env() -> String {
    "PROXMOX_API_TOKEN_ID".to_string()
}

fn default_unifi_api_key_env() -> String {
    "UNIFI_API_KEY".to_string()
}

fn default_unifi_username_env() -> String {
    "UNIFI_OS_USERNAME".to_string()
}

fn default_unifi_password_env() -> String {
    "UNIFI_OS_PASSWORD".to_string()
}

fn default_login_path() -> String {
    "/api/auth/login".to_string()
}

// =============================================================================
// Sections
// =============================================================================

/// HTTP client settings of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Base URL relative endpoints are joined onto.
    #[serde(default)]
    pub base_url: String,

    /// Verify TLS certificates (default: true).
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Per-request timeout in seconds (default: 20).
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            verify_tls: true,
            timeout_seconds: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl HttpSettings {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Authentication handshake. Credentials are read from the environment
/// variables named here, never from the job file itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    #[default]
    None,

    /// `Authorization: PVEAPIToken=<id>=<secret>`.
    ProxmoxToken {
        /// Variable holding the token id.
        #[serde(default = "default_proxmox_token_id_env")]
        token_id_env: String,
        /// Variable holding the token secret.
        #[serde(default)]
        token_secret_env: Option<String>,
    },

    /// `X-API-KEY: <key>`.
    UnifiApiKey {
        /// Variable holding the key.
        #[serde(default = "default_unifi_api_key_env")]
        api_key_env: String,
    },

    /// Cookie session obtained by a login POST, plus the returned CSRF token.
    UnifiOsSession {
        /// Variable holding the username.
        #[serde(default = "default_unifi_username_env")]
        username_env: String,
        /// Variable holding the password.
        #[serde(default = "default_unifi_password_env")]
        password_env: String,
        /// Login path under `base_url`.
        #[serde(default = "default_login_path")]
        login_path: String,
    },
}

/// Collection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectMode {
    /// One fetch, one record.
    #[default]
    Single,
    /// List fetch, then one fetch per listed item.
    Loop,
}

/// The `collect` block.
///
/// Scalar keys of this block, including unknown ones, also seed the
/// interpolation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectConfig {
    #[serde(default)]
    pub mode: CollectMode,

    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    #[serde(default)]
    pub list_endpoint: Option<String>,
    #[serde(default)]
    pub list_method: Option<String>,
    #[serde(default)]
    pub list_body: Option<serde_json::Value>,
    /// Dot path (`data.items`) or JSONPath (`$.data[*]`) to the item list.
    #[serde(default)]
    pub list_json_path: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,

    #[serde(default)]
    pub item_endpoint_template: Option<String>,
    #[serde(default)]
    pub item_method: Option<String>,
    #[serde(default)]
    pub item_body: Option<serde_json::Value>,

    /// Remaining keys (`node`, custom interpolation inputs, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            mode: CollectMode::default(),
            endpoint: None,
            method: None,
            body: None,
            list_endpoint: None,
            list_method: None,
            list_body: None,
            list_json_path: None,
            id_field: default_id_field(),
            item_endpoint_template: None,
            item_method: None,
            item_body: None,
            extra: BTreeMap::new(),
        }
    }
}

impl CollectConfig {
    /// Scalar `node` value, used to keep per-node targets apart.
    pub fn node(&self) -> Option<String> {
        match self.extra.get("node")? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// The `schedule` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub interval_seconds: Option<u64>,
}

impl ScheduleConfig {
    /// Dispatch interval; `None` when absent or zero (always due).
    pub fn interval(&self) -> Option<Duration> {
        self.interval_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// The `storage` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_bronze_prefix")]
    pub bronze_prefix: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    /// Overrides the bronze layout; supports `{dt}`, `{yyyy}`, `{mm}`, `{dd}`.
    #[serde(default)]
    pub path_template: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bronze_prefix: default_bronze_prefix(),
            system: None,
            dataset: None,
            path_template: None,
        }
    }
}

// =============================================================================
// Job Configuration
// =============================================================================

/// Typed, leniently resolved job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub source: String,
    pub entity: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: i64,
    /// Single-mode endpoint; takes precedence over `collect.endpoint`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Extra tags merged into every record's `meta`.
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl JobConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "job source cannot be empty".to_string(),
            ));
        }
        if self.entity.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "job entity cannot be empty".to_string(),
            ));
        }

        match self.collect.mode {
            CollectMode::Single => {
                if self.single_endpoint().is_none() {
                    return Err(ConfigError::ValidationError(
                        "mode 'single' requires 'endpoint'".to_string(),
                    ));
                }
            }
            CollectMode::Loop => {
                if self.collect.list_endpoint.is_none() {
                    return Err(ConfigError::ValidationError(
                        "mode 'loop' requires 'list_endpoint'".to_string(),
                    ));
                }
                if self.collect.item_endpoint_template.is_none() {
                    return Err(ConfigError::ValidationError(
                        "mode 'loop' requires 'item_endpoint_template'".to_string(),
                    ));
                }
                if self.collect.id_field.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "collect id_field cannot be empty".to_string(),
                    ));
                }
            }
        }

        if matches!(self.auth, AuthConfig::UnifiOsSession { .. }) && self.http.base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "http.base_url is required for unifi_os_session auth".to_string(),
            ));
        }

        if self.http.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "http timeout_seconds must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Endpoint of a single-mode job.
    pub fn single_endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .or(self.collect.endpoint.as_deref())
            .filter(|e| !e.is_empty())
    }

    /// Host part of `http.base_url`, falling back to the raw value.
    pub fn host(&self) -> String {
        url::Url::parse(&self.http.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.http.base_url.clone())
    }

    /// Logical spool/remote path of this job's records for `date`.
    pub fn target_path(&self, date: NaiveDate) -> String {
        if let Some(template) = self.storage.path_template.as_deref().filter(|t| !t.is_empty()) {
            return expand_path_template(template, date);
        }

        let node = self.collect.node();
        BronzePath {
            prefix: &self.storage.bronze_prefix,
            system: self.storage.system.as_deref().unwrap_or(&self.source),
            dataset: self.storage.dataset.as_deref().unwrap_or(&self.entity),
            entity: &self.entity,
            unique_id: node.as_deref(),
        }
        .render(date)
    }
}

// =============================================================================
// Job Definition
// =============================================================================

/// A loaded job: its identity, interpolation context and typed config.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// Source file; also the job's scheduling identity.
    pub path: PathBuf,
    /// Display name (file stem).
    pub name: String,
    /// Base interpolation context from the `collect` block.
    pub context: Context,
    /// Leniently resolved configuration.
    pub config: JobConfig,
}

impl JobDefinition {
    /// Load a job definition from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut job = Self::from_yaml_str(&content)?;
        job.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        job.path = path.to_path_buf();
        Ok(job)
    }

    /// Parse a job definition from YAML text.
    ///
    /// # Errors
    /// Returns `ConfigError` if the text cannot be parsed or validated.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw = Document::from_yaml_str(content)?;
        if !matches!(raw, Document::Mapping(_)) {
            return Err(ConfigError::ValidationError(
                "job definition must be a mapping".to_string(),
            ));
        }

        let context = Context::from_collect_block(&raw);
        let resolved = context.resolve_document(&raw, None, Mode::Lenient)?;
        let config: JobConfig = resolved.deserialize_into()?;
        config.validate()?;

        Ok(Self {
            path: PathBuf::new(),
            name: config.entity.clone(),
            context,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXMOX_NODE: &str = r#"
source: proxmox
entity: node_status
schema_version: 2
http:
  base_url: https://pve.lan:8006
  verify_tls: false
auth:
  mode: proxmox_token
  token_secret_env: PROXMOX_SECRET_{NODE}
collect:
  mode: single
  node: hl2
  endpoint: /api2/json/nodes/{node}/status
schedule:
  interval_seconds: 60
meta:
  cluster: home
"#;

    const UNIFI_CLIENTS: &str = r#"
source: unifi
entity: client
http:
  base_url: https://unifi.lan
auth:
  mode: unifi_api_key
collect:
  mode: loop
  list_endpoint: /proxy/network/integration/v1/sites
  list_json_path: data
  item_endpoint_template: /proxy/network/integration/v1/sites/{id}/clients
storage:
  system: network
"#;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_single_job_lenient_resolution() {
        let job = JobDefinition::from_yaml_str(PROXMOX_NODE).unwrap();
        let config = &job.config;

        assert_eq!(config.single_endpoint(), Some("/api2/json/nodes/hl2/status"));
        assert_eq!(
            config.auth,
            AuthConfig::ProxmoxToken {
                token_id_env: "PROXMOX_API_TOKEN_ID".to_string(),
                token_secret_env: Some("PROXMOX_SECRET_HL2".to_string()),
            }
        );
        assert_eq!(config.schema_version, 2);
        assert!(!config.http.verify_tls);
        assert_eq!(config.schedule.interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.host(), "pve.lan");
        assert_eq!(job.context.base().get("node").map(String::as_str), Some("hl2"));
    }

    #[test]
    fn test_target_path_uses_node() {
        let job = JobDefinition::from_yaml_str(PROXMOX_NODE).unwrap();
        assert_eq!(
            job.config.target_path(date()),
            "bronze/proxmox/node_status/dt=2024-03-09/node_status_hl2_2024-03-09.jsonl"
        );
    }

    #[test]
    fn test_loop_job_keeps_item_placeholder() {
        let job = JobDefinition::from_yaml_str(UNIFI_CLIENTS).unwrap();
        let collect = &job.config.collect;

        assert_eq!(collect.mode, CollectMode::Loop);
        assert_eq!(collect.id_field, "id");
        assert_eq!(
            collect.item_endpoint_template.as_deref(),
            Some("/proxy/network/integration/v1/sites/{id}/clients")
        );
        assert_eq!(job.config.schedule.interval(), None);
        assert_eq!(
            job.config.target_path(date()),
            "bronze/network/client/dt=2024-03-09/client_2024-03-09.jsonl"
        );
    }

    #[test]
    fn test_path_template_overrides_layout() {
        let yaml = r#"
source: unifi
entity: device
endpoint: /api/devices
storage:
  path_template: raw/unifi/{yyyy}/{mm}/{dd}/devices.jsonl
"#;
        let job = JobDefinition::from_yaml_str(yaml).unwrap();
        assert_eq!(job.config.target_path(date()), "raw/unifi/2024/03/09/devices.jsonl");
    }

    #[test]
    fn test_zero_interval_is_always_due() {
        let schedule = ScheduleConfig {
            interval_seconds: Some(0),
        };
        assert_eq!(schedule.interval(), None);
    }

    #[test]
    fn test_single_without_endpoint_rejected() {
        let err = JobDefinition::from_yaml_str("source: a\nentity: b\n").unwrap_err();
        assert!(err.to_string().contains("requires 'endpoint'"));
    }

    #[test]
    fn test_loop_without_template_rejected() {
        let yaml = "source: a\nentity: b\ncollect:\n  mode: loop\n  list_endpoint: /x\n";
        let err = JobDefinition::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("item_endpoint_template"));
    }

    #[test]
    fn test_unknown_auth_mode_rejected() {
        let yaml = "source: a\nentity: b\nendpoint: /x\nauth:\n  mode: kerberos\n";
        assert!(matches!(
            JobDefinition::from_yaml_str(yaml),
            Err(ConfigError::SchemaError(_))
        ));
    }

    #[test]
    fn test_integer_keys_in_body_load() {
        let yaml = "source: a\nentity: b\ncollect:\n  endpoint: /x\n  method: POST\n  body:\n    200: ok\n";
        let job = JobDefinition::from_yaml_str(yaml).unwrap();
        assert_eq!(job.config.collect.body, Some(serde_json::json!({"200": "ok"})));
    }

    #[test]
    fn test_non_mapping_rejected() {
        assert!(JobDefinition::from_yaml_str("- a\n- b\n").is_err());
        assert!(JobDefinition::from_yaml_str("").is_err());
    }

    #[test]
    fn test_load_sets_name_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pve_hl2.yaml");
        std::fs::write(&path, PROXMOX_NODE).unwrap();

        let job = JobDefinition::load(&path).unwrap();
        assert_eq!(job.name, "pve_hl2");
        assert_eq!(job.path, path);
    }
}
