//! Loop-mode list handling.

use serde_json::Value;
use serde_json_path::JsonPath;

use crate::config::ConfigError;
use crate::interpolate::Vars;

/// Extract the item list from a list response.
///
/// `path` is either a dot path (`data.items`) or a JSONPath (`$.data[*]`).
/// A result that is not a list yields no items.
///
/// # Errors
/// Returns `ConfigError::ValidationError` for an unparsable JSONPath.
pub fn extract_items(response: &Value, path: Option<&str>) -> Result<Vec<Value>, ConfigError> {
    let path = path.map(str::trim).filter(|p| !p.is_empty());

    let selected = match path {
        None => response.clone(),
        Some(expr) if expr.starts_with('$') => {
            let json_path = expr.parse::<JsonPath>().map_err(|e| {
                ConfigError::ValidationError(format!("invalid list_json_path '{expr}': {e}"))
            })?;
            let nodes = json_path.query(response).all();
            match nodes.as_slice() {
                [single @ Value::Array(_)] => (*single).clone(),
                _ => Value::Array(nodes.into_iter().cloned().collect()),
            }
        }
        Some(dotted) => {
            let mut current = response;
            for key in dotted.split('.') {
                match current {
                    Value::Object(map) => match map.get(key) {
                        Some(next) => current = next,
                        None => return Ok(Vec::new()),
                    },
                    _ => break,
                }
            }
            current.clone()
        }
    };

    match selected {
        Value::Array(items) => Ok(items),
        other => {
            tracing::warn!(
                path = path.unwrap_or(""),
                found = json_kind(&other),
                "Expected a list, skipping"
            );
            Ok(Vec::new())
        }
    }
}

/// The item's id, if present and truthy.
pub fn item_id<'a>(item: &'a Value, id_field: &str) -> Option<&'a Value> {
    item.get(id_field).filter(|id| is_truthy(id))
}

/// Runtime interpolation layer for one item: `id` plus every item field.
pub fn item_vars(item: &Value, id: &Value) -> Vars {
    let mut vars = Vars::new();
    vars.insert("id".to_string(), render(id));
    if let Value::Object(fields) = item {
        for (key, value) in fields {
            vars.insert(key.clone(), render(value));
        }
    }
    vars
}

/// Text form of a JSON value for interpolation.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dot_path() {
        let response = json!({"data": {"items": [{"id": 7}, {"id": 8}]}});
        let items = extract_items(&response, Some("data.items")).unwrap();
        assert_eq!(items, vec![json!({"id": 7}), json!({"id": 8})]);
    }

    #[test]
    fn test_no_path_uses_root_list() {
        let items = extract_items(&json!([1, 2, 3]), None).unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_missing_key_yields_empty() {
        let items = extract_items(&json!({"data": {}}), Some("data.items")).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_non_list_yields_empty() {
        let items = extract_items(&json!({"data": {"count": 1}}), Some("data")).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_json_path_forms() {
        let response = json!({"data": [{"id": "a"}, {"id": "b"}]});
        assert_eq!(extract_items(&response, Some("$.data")).unwrap().len(), 2);
        assert_eq!(extract_items(&response, Some("$.data[*]")).unwrap().len(), 2);
        assert_eq!(
            extract_items(&response, Some("$.data[*].id")).unwrap(),
            vec![json!("a"), json!("b")]
        );
    }

    #[test]
    fn test_invalid_json_path() {
        assert!(extract_items(&json!({}), Some("$[")).is_err());
    }

    #[test]
    fn test_item_id_truthiness() {
        assert_eq!(item_id(&json!({"id": 7}), "id"), Some(&json!(7)));
        assert_eq!(item_id(&json!({"mac": "aa:bb"}), "mac"), Some(&json!("aa:bb")));
        assert!(item_id(&json!({"id": 0}), "id").is_none());
        assert!(item_id(&json!({"id": ""}), "id").is_none());
        assert!(item_id(&json!({"id": null}), "id").is_none());
        assert!(item_id(&json!({"id": false}), "id").is_none());
        assert!(item_id(&json!({"name": "x"}), "id").is_none());
        assert!(item_id(&json!("scalar"), "id").is_none());
    }

    #[test]
    fn test_item_vars() {
        let item = json!({"id": 7, "name": "sw1", "ports": [1, 2], "site": {"id": "s"}});
        let vars = item_vars(&item, &json!(7));
        assert_eq!(vars.get("id").map(String::as_str), Some("7"));
        assert_eq!(vars.get("name").map(String::as_str), Some("sw1"));
        assert_eq!(vars.get("ports").map(String::as_str), Some("[1,2]"));
        assert_eq!(vars.get("site").map(String::as_str), Some(r#"{"id":"s"}"#));
    }

    #[test]
    fn test_item_vars_id_from_custom_field() {
        let item = json!({"_id": "abc"});
        let vars = item_vars(&item, &json!("abc"));
        assert_eq!(vars.get("id").map(String::as_str), Some("abc"));
        assert_eq!(vars.get("_id").map(String::as_str), Some("abc"));
    }
}
