//! Layered resolution context and placeholder substitution.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Flat variable layer: placeholder name to replacement text.
pub type Vars = BTreeMap<String, String>;

/// How unknown placeholders are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Unknown placeholder is an error.
    #[default]
    Strict,
    /// Unknown placeholder is left verbatim.
    Lenient,
}

/// Errors raised while resolving placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// A placeholder had no value in the merged context (strict mode only).
    #[error("configuration variable '{key}' missing during resolution of '{template}'")]
    MissingVariable {
        /// First placeholder name that could not be resolved.
        key: String,
        /// The template being resolved.
        template: String,
    },
}

/// Base layer of an interpolation context.
///
/// The context itself is immutable; every resolution call merges the base
/// layer with the caller's runtime layer and derives the upper-cased layer
/// on the fly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    base: Vars,
}

impl Context {
    /// Create a context from base key/value pairs.
    pub fn new<I, K, V>(base: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            base: base
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The static base layer.
    pub fn base(&self) -> &Vars {
        &self.base
    }

    /// Merge base + runtime layers and append the upper-cased layer.
    ///
    /// For `node = "hl2"` the merged map also holds `NODE = "HL2"`. Derived
    /// entries overwrite same-named entries from the lower layers.
    pub fn merged(&self, extra: Option<&Vars>) -> Vars {
        let mut vars = self.base.clone();
        if let Some(extra) = extra {
            vars.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let upper: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.to_uppercase()))
            .collect();
        vars.extend(upper);
        vars
    }

    /// Resolve every `{name}` placeholder in `text`.
    ///
    /// Substituted values are not scanned again, so a value that itself
    /// contains `{...}` passes through verbatim even in [`Mode::Strict`].
    ///
    /// # Errors
    /// In [`Mode::Strict`], returns [`ResolutionError::MissingVariable`] for
    /// the first placeholder (left to right) absent from the merged context.
    pub fn resolve_str(
        &self,
        text: &str,
        extra: Option<&Vars>,
        mode: Mode,
    ) -> Result<String, ResolutionError> {
        substitute(text, &self.merged(extra), mode)
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("failed to compile placeholder regex"))
}

/// Substitute placeholders in one template against an already merged layer.
///
/// Replacement text is inserted as-is and never re-scanned.
pub(crate) fn substitute(template: &str, vars: &Vars, mode: Mode) -> Result<String, ResolutionError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);

        match (vars.get(key.as_str()), mode) {
            (Some(value), _) => out.push_str(value),
            (None, Mode::Lenient) => out.push_str(whole.as_str()),
            (None, Mode::Strict) => {
                return Err(ResolutionError::MissingVariable {
                    key: key.as_str().to_string(),
                    template: template.to_string(),
                });
            }
        }
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_placeholders(text: &str) -> bool {
        placeholder_regex().is_match(text)
    }

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_strict_resolves_node_status_path() {
        let ctx = Context::new([("node", "hl2")]);
        let lenient = ctx
            .resolve_str("/api2/json/nodes/{node}/status", None, Mode::Lenient)
            .unwrap();
        let strict = ctx.resolve_str(&lenient, None, Mode::Strict).unwrap();
        assert_eq!(strict, "/api2/json/nodes/hl2/status");
    }

    #[test]
    fn test_strict_names_first_missing_key() {
        let ctx = Context::new([("node", "hl2")]);
        let err = ctx
            .resolve_str("/nodes/{node}/{vmid}/{kind}", None, Mode::Strict)
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::MissingVariable {
                key: "vmid".to_string(),
                template: "/nodes/{node}/{vmid}/{kind}".to_string(),
            }
        );
        assert!(err.to_string().contains("'vmid'"));
    }

    #[test]
    fn test_strict_is_deterministic_and_complete() {
        let ctx = Context::new([("site", "default"), ("node", "hl2")]);
        let extra = vars(&[("id", "42")]);
        let template = "/proxy/{site}/{node}/items/{id}?n={NODE}";

        let first = ctx.resolve_str(template, Some(&extra), Mode::Strict).unwrap();
        let second = ctx.resolve_str(template, Some(&extra), Mode::Strict).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, "/proxy/default/hl2/items/42?n=HL2");
        assert!(!has_placeholders(&first));
    }

    #[test]
    fn test_lenient_keeps_unknown_placeholders_verbatim() {
        let ctx = Context::new([("node", "hl2")]);
        let out = ctx
            .resolve_str("/nodes/{node}/qemu/{id}/{ id }", None, Mode::Lenient)
            .unwrap();
        assert_eq!(out, "/nodes/hl2/qemu/{id}/{ id }");
    }

    #[test]
    fn test_lenient_is_idempotent() {
        let ctx = Context::new([("node", "hl2")]);
        let once = ctx
            .resolve_str("{node}-{missing}-{NODE}", None, Mode::Lenient)
            .unwrap();
        let twice = ctx.resolve_str(&once, None, Mode::Lenient).unwrap();
        assert_eq!(once, "hl2-{missing}-HL2");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_runtime_layer_overrides_base() {
        let ctx = Context::new([("id", "base")]);
        let extra = vars(&[("id", "7")]);
        assert_eq!(
            ctx.resolve_str("/items/{id}", Some(&extra), Mode::Strict).unwrap(),
            "/items/7"
        );
    }

    #[test]
    fn test_upper_layer_derived_after_merge() {
        let ctx = Context::new([("node", "hl2")]);
        let extra = vars(&[("name", "vm-a")]);
        let merged = ctx.merged(Some(&extra));
        assert_eq!(merged.get("NODE").map(String::as_str), Some("HL2"));
        assert_eq!(merged.get("NAME").map(String::as_str), Some("VM-A"));
        assert_eq!(merged.get("node").map(String::as_str), Some("hl2"));
    }

    #[test]
    fn test_non_placeholder_braces_are_literal() {
        let ctx = Context::default();
        assert_eq!(
            ctx.resolve_str("{} and { and }", None, Mode::Strict).unwrap(),
            "{} and { and }"
        );
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let ctx = Context::new([("a", "{b}"), ("b", "x")]);
        assert_eq!(ctx.resolve_str("{a}", None, Mode::Strict).unwrap(), "{b}");

        // A braced value naming nothing in the context still passes strict mode.
        let ctx = Context::new([("a", "{undefined}")]);
        assert_eq!(
            ctx.resolve_str("x-{a}", None, Mode::Strict).unwrap(),
            "x-{undefined}"
        );
    }
}
