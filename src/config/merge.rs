//! Deep merge for layered and partial configuration documents.
//!
//! Objects merge field by field with the overlay winning. Lists and scalars
//! are replaced whole, never concatenated. A `null` in the overlay means
//! "not specified" and keeps the base value.

use super::path::ConfigPath;
use serde_json::{Map, Value};

/// Deep merge `overlay` onto `base`.
///
/// # Example
/// ```
/// use serde_json::json;
/// use config_sentinel::config::deep_merge;
///
/// let base = json!({"model": {"name": "claude-sonnet", "temperature": 0.7}});
/// let overlay = json!({"model": {"temperature": 0.2}});
/// let merged = deep_merge(base, overlay);
/// assert_eq!(merged, json!({"model": {"name": "claude-sonnet", "temperature": 0.2}}));
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Merge several layers in order, later layers taking precedence.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}

/// Replace the value at `path`, creating intermediate objects as needed.
///
/// Returns `false` when a non-object value sits on the way to `path`.
pub fn set_at_path(root: &mut Value, path: &ConfigPath, new_value: Value) -> bool {
    let Some((last, parents)) = path.segments().split_last() else {
        *root = new_value;
        return true;
    };

    let mut current = root;
    for segment in parents {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return false;
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(last.clone(), new_value);
            true
        }
        _ => false,
    }
}

/// Build a partial document holding a single value at `path`.
pub fn partial_at(path: &ConfigPath, value: Value) -> Value {
    let mut root = Value::Object(Map::new());
    set_at_path(&mut root, path, value);
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_section_fields_merge() {
        let base = json!({"rate_limits": {"per_user_per_minute": 10, "per_user_per_day": 500}});
        let overlay = json!({"rate_limits": {"per_user_per_minute": 5}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"rate_limits": {"per_user_per_minute": 5, "per_user_per_day": 500}})
        );
    }

    #[test]
    fn test_lists_replaced_not_concatenated() {
        let base = json!({"features": {"enabled": ["chat", "memory"]}});
        let overlay = json!({"features": {"enabled": ["chat"]}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"features": {"enabled": ["chat"]}})
        );
    }

    #[test]
    fn test_null_keeps_base() {
        let base = json!({"cache": {"enabled": true, "ttl_seconds": 60}});
        let overlay = json!({"cache": {"ttl_seconds": null}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"cache": {"enabled": true, "ttl_seconds": 60}})
        );
    }

    #[test]
    fn test_merge_all_layers() {
        let layers = vec![
            json!({"model": {"temperature": 0.7, "top_p": 1.0}}),
            json!({"model": {"temperature": 0.5}}),
            json!({"model": {"temperature": 0.2}, "bot": {"name": "x"}}),
        ];
        assert_eq!(
            deep_merge_all(layers),
            json!({"model": {"temperature": 0.2, "top_p": 1.0}, "bot": {"name": "x"}})
        );
    }

    #[test]
    fn test_scalar_replaced_by_object_and_back() {
        assert_eq!(
            deep_merge(json!({"v": 1}), json!({"v": {"nested": true}})),
            json!({"v": {"nested": true}})
        );
        assert_eq!(
            deep_merge(json!({"v": {"nested": true}}), json!({"v": 1})),
            json!({"v": 1})
        );
    }

    #[test]
    fn test_set_at_path_creates_parents() {
        let mut root = json!({});
        let path = ConfigPath::parse("timeouts.request_ms").unwrap();
        assert!(set_at_path(&mut root, &path, json!(9000)));
        assert_eq!(root, json!({"timeouts": {"request_ms": 9000}}));
    }

    #[test]
    fn test_set_at_path_through_scalar_fails() {
        let mut root = json!({"model": "flat"});
        let path = ConfigPath::parse("model.name").unwrap();
        assert!(!set_at_path(&mut root, &path, json!("x")));
        assert_eq!(root, json!({"model": "flat"}));
    }

    #[test]
    fn test_partial_at() {
        let path = ConfigPath::parse("safety.content_filter").unwrap();
        assert_eq!(
            partial_at(&path, json!(false)),
            json!({"safety": {"content_filter": false}})
        );
    }
}
