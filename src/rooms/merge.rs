//! Deep merge and public projection over JSON config trees.

use serde_json::Value;

/// Key substrings that mark a value as secret-bearing. Matching is
/// case-insensitive and substring-based, so `obsPassword`, `rtspUrl` and
/// `authToken` are all caught.
const SECRET_KEYWORDS: &[&str] = &[
    "password", "pass", "secret", "token", "auth", "rtsp", "cookie",
];

pub fn is_secret_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SECRET_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Right-biased recursive merge: `extra` wins on conflicts; nested objects
/// merge key by key; anything else (arrays, scalars) is replaced wholesale.
pub fn deep_merge(base: &Value, extra: &Value) -> Value {
    match (base, extra) {
        (Value::Object(base_map), Value::Object(extra_map)) => {
            let mut out = base_map.clone();
            for (key, extra_val) in extra_map {
                let merged = match out.get(key) {
                    Some(base_val) => deep_merge(base_val, extra_val),
                    None => extra_val.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        _ => extra.clone(),
    }
}

/// Public-safe projection: recursively removes every key whose name contains
/// a secret-indicating substring. Used for the room lists exposed to
/// non-admin callers.
pub fn strip_secret_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_secret_key(key))
                .map(|(key, val)| (key.clone(), strip_secret_keys(val)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_secret_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_is_right_biased() {
        let base = json!({"x": {"y": 1}});
        let extra = json!({"x": {"y": 2, "z": 3}});
        assert_eq!(deep_merge(&base, &extra), json!({"x": {"y": 2, "z": 3}}));
    }

    #[test]
    fn test_merge_preserves_base_keys() {
        let base = json!({"ws": "ws://a:4455", "enabled": true});
        let extra = json!({"password": "pw"});
        assert_eq!(
            deep_merge(&base, &extra),
            json!({"ws": "ws://a:4455", "enabled": true, "password": "pw"})
        );
    }

    #[test]
    fn test_merge_replaces_arrays_and_scalars() {
        let base = json!({"tags": [1, 2], "n": 1});
        let extra = json!({"tags": [3], "n": {"deep": true}});
        assert_eq!(
            deep_merge(&base, &extra),
            json!({"tags": [3], "n": {"deep": true}})
        );
    }

    #[test]
    fn test_strip_removes_secret_keys_recursively() {
        let value = json!({
            "ws": "ws://a:4455",
            "password": "pw",
            "obs": {"authToken": "t", "port": 4455},
            "streams": [{"rtspUrl": "rtsp://cam", "name": "main"}]
        });
        assert_eq!(
            strip_secret_keys(&value),
            json!({
                "ws": "ws://a:4455",
                "obs": {"port": 4455},
                "streams": [{"name": "main"}]
            })
        );
    }

    #[test]
    fn test_secret_key_matching_is_case_insensitive() {
        assert!(is_secret_key("Password"));
        assert!(is_secret_key("obsPassword"));
        assert!(is_secret_key("RTSP"));
        assert!(is_secret_key("setCookie"));
        assert!(!is_secret_key("enabled"));
        assert!(!is_secret_key("ws"));
    }
}
