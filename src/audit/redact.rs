//! Sensitive-value scrubbing for audit metadata.

use serde_json::Value;

/// Key substrings whose values are replaced before an event is written.
/// Matching is case-insensitive and substring-based.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "pass",
    "pwd",
    "token",
    "authorization",
    "auth",
    "secret",
    "cookie",
    "set-cookie",
    "passwordhash",
];

const REDACTED: &str = "[REDACTED]";
const CIRCULAR: &str = "[CIRCULAR]";

/// Depth bound for the recursion. JSON values cannot be cyclic, but the
/// bound caps pathological nesting the same way cycle detection caps a
/// self-referencing structure: anything deeper collapses to `[CIRCULAR]`.
const MAX_DEPTH: usize = 64;

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|kw| lower.contains(kw))
}

/// Produce a copy of `value` with every sensitive-keyed entry replaced by a
/// redaction marker, recursively through objects and arrays.
pub fn redact_value(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(CIRCULAR.to_string());
    }

    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let out = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_at(val, depth + 1)
                    };
                    (key.clone(), out)
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_at(v, depth + 1)).collect())
        }
        other => other.clone(),
    }
}
