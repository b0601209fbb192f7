//! Mapping and variable-name canonicalization shared by the body codec, the
//! structural differ, and the classifier.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn root_key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^root\['([a-zA-Z0-9_\-.]+)'\]$").unwrap())
}

fn unsafe_char_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_]").unwrap())
}

/// Collapses every object entry whose value is a one-element array down to
/// that single element, recursing into nested objects. Mirrors the
/// original's `normalize_dict`: arrays are only unwrapped one level, and the
/// recursion follows nested objects, never nested arrays.
pub fn normalize_mapping(value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };

    let keys: Vec<String> = map.keys().cloned().collect();

    for key in keys {
        if matches!(map.get(&key), Some(Value::Array(arr)) if arr.len() == 1) {
            if let Some(Value::Array(mut arr)) = map.remove(&key) {
                map.insert(key.clone(), arr.remove(0));
            }
        }

        if let Some(v) = map.get_mut(&key) {
            if v.is_object() {
                normalize_mapping(v);
            }
        }
    }
}

/// Renames a key of the form `root['X']` to `X`, then strips every character
/// outside `[A-Za-z0-9_]` from whatever remains. This is the sanitizer a
/// diffed field's raw location path (a dotted/bracketed body path, a header
/// name, ...) must pass through before it becomes an externally-visible
/// variable name — regex capture group identifiers and the JSON variable
/// report both require it.
pub fn normalize_name(key: &str) -> String {
    let key = match root_key_pattern().captures(key) {
        Some(caps) => caps[1].to_string(),
        None => key.to_string(),
    };
    unsafe_char_pattern().replace_all(&key, "").to_string()
}

/// Applies [`normalize_name`] to every key of `map`. Collisions are resolved
/// last-write-wins, matching the original's in-place dict mutation order.
pub fn normalize_variable_name<V>(map: BTreeMap<String, V>) -> BTreeMap<String, V> {
    let mut out = BTreeMap::new();

    for (key, value) in map {
        out.insert(normalize_name(&key), value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collapses_single_element_arrays() {
        let mut v = json!({"page": ["1"], "ids": ["a", "b"]});
        normalize_mapping(&mut v);
        assert_eq!(v["page"], json!("1"));
        assert_eq!(v["ids"], json!(["a", "b"]));
    }

    #[test]
    fn recurses_into_nested_objects_only() {
        let mut v = json!({"user": {"id": ["u1"]}, "tags": [["x"]]});
        normalize_mapping(&mut v);
        assert_eq!(v["user"]["id"], json!("u1"));
        // nested arrays are not recursed into
        assert_eq!(v["tags"], json!([["x"]]));
    }

    #[test]
    fn strips_root_bracket_syntax() {
        let mut map = BTreeMap::new();
        map.insert("root['user_id']".to_string(), 1);
        let out = normalize_variable_name(map);
        assert!(out.contains_key("user_id"));
    }

    #[test]
    fn strips_unsafe_characters() {
        let mut map = BTreeMap::new();
        map.insert("user-id!".to_string(), 1);
        let out = normalize_variable_name(map);
        assert!(out.contains_key("userid"));
    }

    #[test]
    fn normalize_name_strips_dotted_body_paths() {
        assert_eq!(normalize_name("profile.user_id"), "profileuser_id");
        assert_eq!(normalize_name("items[0]"), "items0");
        assert_eq!(normalize_name("url_path_1"), "url_path_1");
    }
}
