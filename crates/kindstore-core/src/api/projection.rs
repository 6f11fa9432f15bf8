//! Projection: return only selected properties from documents.
//!
//! Projection is applied after filtering and ordering; the full document is
//! always evaluated, then trimmed before it is returned.

use serde_json::{Map, Value};

use super::filter::lookup;

/// Whether every projected path is present on the document.
pub fn has_projected(doc: &Value, paths: &[String]) -> bool {
    paths.iter().all(|path| lookup(doc, path).is_some())
}

/// Apply a projection to a document, returning only the specified paths.
/// If `paths` is empty, returns the full document.
pub fn apply_projection(doc: &Value, paths: &[String]) -> Value {
    if paths.is_empty() {
        return doc.clone();
    }

    let mut result = Map::new();
    for path in paths {
        if let Some(val) = lookup(doc, path) {
            set_nested_path(&mut result, path, val.clone());
        }
    }

    Value::Object(result)
}

/// Set a value at a dot-separated path, creating intermediate objects as needed.
fn set_nested_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = target;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let slot = current
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "name": "Alice",
            "age": 30,
            "address": {"city": "Portland", "zip": "97201"},
        })
    }

    #[test]
    fn test_projection_empty_returns_full_document() {
        assert_eq!(apply_projection(&doc(), &[]), doc());
    }

    #[test]
    fn test_projection_top_level_and_nested() {
        let projected = apply_projection(&doc(), &["name".into(), "address.city".into()]);
        assert_eq!(
            projected,
            json!({"name": "Alice", "address": {"city": "Portland"}})
        );
    }

    #[test]
    fn test_projection_skips_missing_paths() {
        let projected = apply_projection(&doc(), &["name".into(), "email".into()]);
        assert_eq!(projected, json!({"name": "Alice"}));
        assert!(!has_projected(&doc(), &["name".into(), "email".into()]));
        assert!(has_projected(&doc(), &["address.zip".into()]));
    }
}
