//! Nested configuration documents.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::context::{Context, Mode, ResolutionError, Vars, substitute};

/// A configuration value as loaded from YAML.
///
/// Only string leaves take part in interpolation; every other variant is
/// carried through resolution unchanged. Non-string mapping keys (`200: ok`)
/// are kept under their text form.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Document {
    /// Explicit or implicit null.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Integer(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar, subject to interpolation.
    String(String),
    /// Ordered sequence.
    Sequence(Vec<Document>),
    /// String-keyed mapping.
    Mapping(BTreeMap<String, Document>),
}

impl Document {
    /// Parse a YAML document. An empty input yields [`Document::Null`].
    pub fn from_yaml_str(input: &str) -> Result<Self, serde_yaml::Error> {
        if input.trim().is_empty() {
            return Ok(Self::Null);
        }
        serde_yaml::from_str(input)
    }

    /// Look up a key of a mapping document.
    pub fn get(&self, key: &str) -> Option<&Document> {
        match self {
            Self::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    /// Borrow the string value, if this is a string leaf.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// True for [`Document::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text form of a scalar leaf, `None` for null, sequences and mappings.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(b.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Null | Self::Sequence(_) | Self::Mapping(_) => None,
        }
    }

    /// Deserialize this document into a typed configuration struct.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    fn resolve_with(&self, vars: &Vars, mode: Mode) -> Result<Self, ResolutionError> {
        Ok(match self {
            Self::String(s) => Self::String(substitute(s, vars, mode)?),
            Self::Mapping(map) => Self::Mapping(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.resolve_with(vars, mode)?)))
                    .collect::<Result<_, ResolutionError>>()?,
            ),
            Self::Sequence(items) => Self::Sequence(
                items
                    .iter()
                    .map(|v| v.resolve_with(vars, mode))
                    .collect::<Result<_, _>>()?,
            ),
            leaf => leaf.clone(),
        })
    }
}

impl From<serde_yaml::Value> for Document {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            Value::String(s) => Self::String(s),
            Value::Sequence(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Mapping(map) => Self::Mapping(
                map.into_iter()
                    .map(|(k, v)| (key_text(k), Self::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Self::from(tagged.value),
        }
    }
}

/// Text form of a YAML mapping key.
fn key_text(key: serde_yaml::Value) -> String {
    match Document::from(key) {
        Document::String(s) => s,
        Document::Null => "null".to_string(),
        scalar @ (Document::Bool(_) | Document::Integer(_) | Document::Float(_)) => {
            scalar.scalar_text().unwrap_or_default()
        }
        nested => serde_json::to_string(&nested).unwrap_or_default(),
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_yaml::Value::deserialize(deserializer).map(Self::from)
    }
}

impl From<&str> for Document {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl Context {
    /// Seed a context from the scalar entries of a job's `collect` block.
    pub fn from_collect_block(job: &Document) -> Self {
        let Some(Document::Mapping(collect)) = job.get("collect") else {
            return Self::default();
        };
        Self::new(
            collect
                .iter()
                .filter_map(|(k, v)| v.scalar_text().map(|text| (k.clone(), text))),
        )
    }

    /// Resolve every string leaf of `doc`, returning a new document.
    ///
    /// The merged layer is computed once for the whole walk.
    ///
    /// # Errors
    /// In [`Mode::Strict`], fails on the first string leaf with an unknown
    /// placeholder.
    pub fn resolve_document(
        &self,
        doc: &Document,
        extra: Option<&Vars>,
        mode: Mode,
    ) -> Result<Document, ResolutionError> {
        doc.resolve_with(&self.merged(extra), mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
source: proxmox
entity: node_status
schema_version: 2
http:
  base_url: "https://{node}.lan:8006"
  verify_tls: false
collect:
  mode: loop
  node: hl2
  port: 8006
  list_endpoint: "/api2/json/nodes/{node}/qemu"
  item_endpoint_template: "/api2/json/nodes/{node}/qemu/{id}/status/current"
tags:
  - "{NODE}"
  - 3
"#;

    #[test]
    fn test_from_collect_block_takes_scalars() {
        let doc = Document::from_yaml_str(JOB).unwrap();
        let ctx = Context::from_collect_block(&doc);
        assert_eq!(ctx.base().get("node").map(String::as_str), Some("hl2"));
        assert_eq!(ctx.base().get("port").map(String::as_str), Some("8006"));
        assert_eq!(ctx.base().get("mode").map(String::as_str), Some("loop"));
    }

    #[test]
    fn test_lenient_document_leaves_runtime_placeholders() {
        let doc = Document::from_yaml_str(JOB).unwrap();
        let ctx = Context::from_collect_block(&doc);
        let resolved = ctx.resolve_document(&doc, None, Mode::Lenient).unwrap();

        let http = resolved.get("http").unwrap();
        assert_eq!(
            http.get("base_url").and_then(Document::as_str),
            Some("https://hl2.lan:8006")
        );
        assert_eq!(http.get("verify_tls"), Some(&Document::Bool(false)));

        let collect = resolved.get("collect").unwrap();
        assert_eq!(
            collect.get("item_endpoint_template").and_then(Document::as_str),
            Some("/api2/json/nodes/hl2/qemu/{id}/status/current")
        );
        assert_eq!(resolved.get("schema_version"), Some(&Document::Integer(2)));
        assert_eq!(
            resolved.get("tags"),
            Some(&Document::Sequence(vec![
                Document::from("HL2"),
                Document::Integer(3)
            ]))
        );
    }

    #[test]
    fn test_non_string_keys_use_their_text_form() {
        let doc = Document::from_yaml_str("body:\n  200: ok\n  true: yes\n  1.5: x\n").unwrap();
        let body = doc.get("body").unwrap();
        assert_eq!(body.get("200").and_then(Document::as_str), Some("ok"));
        assert_eq!(body.get("true").and_then(Document::as_str), Some("yes"));
        assert_eq!(body.get("1.5").and_then(Document::as_str), Some("x"));
    }

    #[test]
    fn test_resolve_document_does_not_mutate_input() {
        let doc = Document::from_yaml_str(JOB).unwrap();
        let before = doc.clone();
        let ctx = Context::from_collect_block(&doc);
        let _ = ctx.resolve_document(&doc, None, Mode::Lenient).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn test_strict_document_fails_on_runtime_placeholder() {
        let doc = Document::from_yaml_str(JOB).unwrap();
        let ctx = Context::from_collect_block(&doc);
        let err = ctx.resolve_document(&doc, None, Mode::Strict).unwrap_err();
        assert!(matches!(err, ResolutionError::MissingVariable { ref key, .. } if key == "id"));
    }

    #[test]
    fn test_empty_yaml_is_null() {
        assert!(Document::from_yaml_str("  \n").unwrap().is_null());
    }
}
