//! Wrapped records: raw API payloads plus lineage metadata.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Lineage metadata attached to every collected payload.
///
/// Serializes as one flat object. An `extra` tag named like a fixed field
/// replaces that field's value in place, so every key appears once.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordMeta {
    /// Source system (e.g. `proxmox`).
    pub source: String,
    /// Entity collected from the source (e.g. `node_status`).
    pub entity: String,
    /// Payload schema version.
    pub schema_version: i64,
    /// Host part of the API base URL.
    pub host: String,
    /// Collection time, RFC 3339 UTC.
    pub collected_at_utc: String,
    /// Hostname of the machine running the collector.
    pub collector_host: String,
    /// Deployment environment tag.
    pub environment: String,
    /// Extra tags (job `meta` block, loop-mode item id).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RecordMeta {
    fn fixed_fields(&self) -> [(&'static str, serde_json::Value); 7] {
        [
            ("source", self.source.as_str().into()),
            ("entity", self.entity.as_str().into()),
            ("schema_version", self.schema_version.into()),
            ("host", self.host.as_str().into()),
            ("collected_at_utc", self.collected_at_utc.as_str().into()),
            ("collector_host", self.collector_host.as_str().into()),
            ("environment", self.environment.as_str().into()),
        ]
    }
}

impl Serialize for RecordMeta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fixed = self.fixed_fields();
        let mut map = serializer.serialize_map(Some(fixed.len() + self.extra.len()))?;
        for (key, value) in &fixed {
            map.serialize_entry(key, self.extra.get(*key).unwrap_or(value))?;
        }
        for (key, value) in &self.extra {
            if !fixed.iter().any(|(name, _)| name == key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// One spooled record: `{"meta": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolRecord {
    /// Lineage metadata.
    pub meta: RecordMeta,
    /// Raw fetched value.
    pub payload: serde_json::Value,
}

impl SpoolRecord {
    /// Compact single-line JSON, newline terminated.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Builder for [`SpoolRecord`] values sharing one job's lineage.
#[derive(Debug, Clone)]
pub struct RecordWrapper {
    source: String,
    entity: String,
    schema_version: i64,
    host: String,
    environment: String,
    collector_host: String,
    extra: BTreeMap<String, serde_json::Value>,
}

impl RecordWrapper {
    /// Create a wrapper for one job run.
    pub fn new(
        source: impl Into<String>,
        entity: impl Into<String>,
        schema_version: i64,
        host: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            entity: entity.into(),
            schema_version,
            host: host.into(),
            environment: environment.into(),
            collector_host: collector_host().to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Add tags merged into every record's `meta`.
    pub fn with_extra(mut self, extra: BTreeMap<String, serde_json::Value>) -> Self {
        self.extra.extend(extra);
        self
    }

    /// Override the collector hostname.
    pub fn with_collector_host(mut self, host: impl Into<String>) -> Self {
        self.collector_host = host.into();
        self
    }

    /// Wrap a payload collected at `collected_at`, adding per-record tags.
    pub fn wrap(
        &self,
        payload: serde_json::Value,
        collected_at: DateTime<Utc>,
        tags: BTreeMap<String, serde_json::Value>,
    ) -> SpoolRecord {
        let mut extra = self.extra.clone();
        extra.extend(tags);

        SpoolRecord {
            meta: RecordMeta {
                source: self.source.clone(),
                entity: self.entity.clone(),
                schema_version: self.schema_version,
                host: self.host.clone(),
                collected_at_utc: collected_at.to_rfc3339_opts(SecondsFormat::Micros, false),
                collector_host: self.collector_host.clone(),
                environment: self.environment.clone(),
                extra,
            },
            payload,
        }
    }
}

/// Hostname of this machine, resolved once.
pub fn collector_host() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    })
}
