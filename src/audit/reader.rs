//! Audit read path: combines a day's primary file with its continuations,
//! tolerating malformed lines.

use std::path::Path;

use serde_json::Value;
use tracing::warn;

use super::sink::audit_file_path;

/// Hard cap on returned events, regardless of the requested limit.
pub const MAX_QUERY_LIMIT: usize = 500;

#[derive(Debug, Default, Clone)]
pub struct QueryFilters {
    /// Exact username match (case-insensitive).
    pub user: Option<String>,
    /// Exact `meta.action` match (case-insensitive).
    pub action: Option<String>,
    /// Substring match on the request path.
    pub contains: Option<String>,
}

/// Read a date's events, newest first, filtered and capped. Malformed lines
/// are skipped rather than failing the whole read; a missing file simply
/// contributes nothing.
pub async fn query(
    dir: &Path,
    date: &str,
    limit: usize,
    max_continuations: u32,
    filters: &QueryFilters,
) -> Vec<Value> {
    let mut paths = vec![audit_file_path(dir, date, None)];
    for n in 2..=max_continuations {
        let candidate = audit_file_path(dir, date, Some(n));
        if candidate.exists() {
            paths.push(candidate);
        } else {
            break;
        }
    }

    let mut events: Vec<Value> = Vec::new();
    for path in paths {
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %path.display(), "Cannot read audit file: {e}");
                continue;
            }
        };
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(event) => events.push(event),
                Err(_) => continue, // tolerate torn/garbage lines
            }
        }
    }

    let user_filter = filters.user.as_deref().map(str::to_lowercase);
    let action_filter = filters.action.as_deref().map(str::to_lowercase);
    let contains_filter = filters.contains.as_deref().map(str::to_lowercase);

    let mut filtered: Vec<Value> = events
        .into_iter()
        .filter(|e| {
            if let Some(user) = &user_filter {
                let event_user = e
                    .get("user")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_lowercase();
                if &event_user != user {
                    return false;
                }
            }
            if let Some(action) = &action_filter {
                let event_action = e
                    .get("meta")
                    .and_then(|m| m.get("action"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_lowercase();
                if &event_action != action {
                    return false;
                }
            }
            if let Some(contains) = &contains_filter {
                let path = e
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_lowercase();
                if !path.contains(contains.as_str()) {
                    return false;
                }
            }
            true
        })
        .collect();

    filtered.reverse();
    filtered.truncate(limit.min(MAX_QUERY_LIMIT));
    filtered
}

/// Dates with at least one audit file, newest first.
pub async fn list_dates(dir: &Path) -> Vec<String> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(_) => return Vec::new(),
    };

    let mut dates = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix("audit-") else {
            continue;
        };
        let Some(stem) = rest.strip_suffix(".jsonl") else {
            continue;
        };
        // Strip a continuation suffix so each date appears once.
        let date = stem.split('_').next().unwrap_or(stem).to_string();
        if !dates.contains(&date) {
            dates.push(date);
        }
    }

    dates.sort();
    dates.reverse();
    dates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::sink::{append_event, AuditEvent, RotationLimits};
    use serde_json::json;
    use tempfile::TempDir;

    fn event(seq: i64, user: &str, path: &str, action: Option<&str>) -> AuditEvent {
        AuditEvent {
            ts: "2026-03-01T10:00:00Z".parse().unwrap(),
            user: user.to_string(),
            role: Some("admin".to_string()),
            method: "POST".to_string(),
            path: path.to_string(),
            status: 200,
            ip: None,
            user_agent: None,
            duration_ms: Some(seq as u64),
            meta: action.map(|a| json!({"action": a, "seq": seq})),
        }
    }

    async fn seed(dir: &TempDir, limits: &RotationLimits) {
        for i in 0..8 {
            let ev = event(
                i,
                if i % 2 == 0 { "ana" } else { "luis" },
                if i < 4 { "/admin/users" } else { "/rooms/central/room1/record/start" },
                if i % 2 == 0 { Some("create_user") } else { None },
            );
            append_event(dir.path(), limits, &ev).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_query_combines_continuations_newest_first() {
        let dir = TempDir::new().unwrap();
        let limits = RotationLimits {
            max_file_bytes: 400,
            max_continuations: 20,
        };
        seed(&dir, &limits).await;

        let events = query(dir.path(), "2026-03-01", 100, 20, &QueryFilters::default()).await;
        assert_eq!(events.len(), 8);
        // Newest (highest seq) first.
        let first = events[0]["durationMs"].as_u64().unwrap();
        let last = events[7]["durationMs"].as_u64().unwrap();
        assert!(first > last);
    }

    #[tokio::test]
    async fn test_query_filters_and_cap() {
        let dir = TempDir::new().unwrap();
        let limits = RotationLimits::default();
        seed(&dir, &limits).await;

        let by_user = query(
            dir.path(),
            "2026-03-01",
            100,
            20,
            &QueryFilters {
                user: Some("ANA".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(by_user.len(), 4);

        let by_action = query(
            dir.path(),
            "2026-03-01",
            100,
            20,
            &QueryFilters {
                action: Some("create_user".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(by_action.len(), 4);

        let by_path = query(
            dir.path(),
            "2026-03-01",
            100,
            20,
            &QueryFilters {
                contains: Some("record/start".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(by_path.len(), 4);

        let limited = query(dir.path(), "2026-03-01", 3, 20, &QueryFilters::default()).await;
        assert_eq!(limited.len(), 3);
    }

    #[tokio::test]
    async fn test_query_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let limits = RotationLimits::default();
        append_event(dir.path(), &limits, &event(1, "ana", "/x", None))
            .await
            .unwrap();

        // Corrupt the file with a torn line.
        let path = audit_file_path(dir.path(), "2026-03-01", None);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"broken\": \n");
        std::fs::write(&path, content).unwrap();
        append_event(dir.path(), &limits, &event(2, "ana", "/y", None))
            .await
            .unwrap();

        let events = query(dir.path(), "2026-03-01", 100, 20, &QueryFilters::default()).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_date_is_empty_and_dates_listed() {
        let dir = TempDir::new().unwrap();
        let limits = RotationLimits::default();

        let events = query(dir.path(), "1999-01-01", 10, 20, &QueryFilters::default()).await;
        assert!(events.is_empty());

        append_event(dir.path(), &limits, &event(1, "ana", "/x", None))
            .await
            .unwrap();
        let dates = list_dates(dir.path()).await;
        assert_eq!(dates, vec!["2026-03-01".to_string()]);
    }
}
