//! Rooms snapshot: merged view of the public and secrets trees, with
//! warnings, counts and a short-TTL cache.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::merge::{deep_merge, strip_secret_keys};
use crate::device::DeviceTarget;
use crate::domain::ErrorKind;

/// One room in a listing. `config` carries the (sanitized or full) merged
/// entry flattened into the object, after the identifying fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEntry {
    pub id: String,
    pub site: String,
    pub room: String,
    pub has_secrets: bool,
    #[serde(flatten)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub total_sites: usize,
    pub total_rooms: usize,
    pub with_secrets: usize,
    pub missing_secrets: usize,
    pub duplicate_endpoints: usize,
    pub duplicate_stream_sources: usize,
}

/// Immutable snapshot of the merged rooms configuration.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub warnings: Vec<Warning>,
    pub counts: Counts,
    /// site -> room -> merged config (secrets included).
    pub merged: HashMap<String, HashMap<String, Value>>,
    /// Sanitized entries, sorted by id.
    pub public_list: Vec<RoomEntry>,
    /// Full merged entries, sorted by id.
    pub full_list: Vec<RoomEntry>,
}

impl Snapshot {
    pub fn room_config(&self, site: &str, room: &str) -> Option<&Value> {
        self.merged.get(site).and_then(|rooms| rooms.get(room))
    }

    /// Resolve the device connection target for a room. Two rooms that share
    /// an endpoint and credential intentionally resolve to the same target
    /// (they share one physical connection; see the duplicate-endpoint
    /// warning, which flags but does not reject this).
    pub fn device_target(&self, site: &str, room: &str) -> Result<DeviceTarget, ErrorKind> {
        let config = self
            .room_config(site, room)
            .ok_or_else(|| ErrorKind::RoomNotConfigured {
                site: site.to_string(),
                room: room.to_string(),
            })?;

        let endpoint = extract_endpoint(config).ok_or_else(|| ErrorKind::RoomNotConfigured {
            site: site.to_string(),
            room: room.to_string(),
        })?;

        let password = config
            .get("password")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(DeviceTarget { endpoint, password })
    }
}

/// Device WebSocket endpoint, from `ws` / `url` strings or the nested
/// `obs.ws` shapes that older room entries use.
pub fn extract_endpoint(config: &Value) -> Option<String> {
    let non_empty = |v: &Value| {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(ws) = config.get("ws").and_then(|v| non_empty(v)) {
        return Some(ws);
    }
    if let Some(url) = config.get("url").and_then(|v| non_empty(v)) {
        return Some(url);
    }

    let obs = config.get("obs")?;
    if let Some(ws) = obs.get("ws") {
        if let Some(s) = non_empty(ws) {
            return Some(s);
        }
        if let Some(url) = ws.get("url").and_then(|v| non_empty(v)) {
            return Some(url);
        }
        let host = ws
            .get("host")
            .and_then(|v| non_empty(v))
            .or_else(|| ws.get("ip").and_then(|v| non_empty(v)))?;
        let port = ws.get("port").and_then(Value::as_u64)?;
        return Some(format!("ws://{host}:{port}"));
    }
    None
}

/// Upstream stream source URL, from the `rtsp`/`rtspUrl`/`stream.rtsp`
/// shapes.
pub fn extract_stream_source(config: &Value) -> Option<String> {
    let non_empty = |v: &Value| {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(rtsp) = config.get("rtsp") {
        if let Some(s) = non_empty(rtsp) {
            return Some(s);
        }
        if let Some(url) = rtsp.get("url").and_then(|v| non_empty(v)) {
            return Some(url);
        }
    }
    if let Some(s) = config.get("rtspUrl").and_then(|v| non_empty(v)) {
        return Some(s);
    }
    config
        .get("stream")
        .and_then(|s| s.get("rtsp"))
        .and_then(|v| non_empty(v))
}

fn bool_or(config: &Value, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Build a snapshot from the two parsed trees. Pure, for testability; file
/// I/O lives in [`RoomsResolver`].
pub fn build_snapshot(public_tree: &Value, secrets_tree: &Value) -> Snapshot {
    let mut warnings = Vec::new();
    let mut merged: HashMap<String, HashMap<String, Value>> = HashMap::new();
    let mut public_list = Vec::new();
    let mut full_list = Vec::new();
    let mut full_by_id: BTreeMap<String, Value> = BTreeMap::new();
    let mut seen_ids: Vec<String> = Vec::new();

    let mut counts = Counts::default();

    let empty = serde_json::Map::new();
    let public_map = public_tree.as_object().unwrap_or(&empty);

    for (site, rooms_raw) in public_map {
        let Some(rooms_map) = rooms_raw.as_object() else {
            continue;
        };
        counts.total_sites += 1;

        for (room, config_raw) in rooms_map {
            if !config_raw.is_object() {
                continue;
            }
            let id = format!("{site}/{room}");
            seen_ids.push(id.clone());
            counts.total_rooms += 1;

            let enabled = bool_or(config_raw, "enabled", true);
            let needs_secrets = bool_or(config_raw, "needsSecrets", true);
            let requires_secrets = enabled && needs_secrets;

            let secret_config = secrets_tree
                .get(site)
                .and_then(|s| s.get(room))
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

            let merged_config = deep_merge(config_raw, &secret_config);

            let has_secrets = secret_config
                .as_object()
                .map(|m| !m.is_empty())
                .unwrap_or(false);
            if has_secrets {
                counts.with_secrets += 1;
            } else if requires_secrets {
                counts.missing_secrets += 1;
                warnings.push(Warning {
                    code: "missing-secrets".to_string(),
                    id: Some(id.clone()),
                    value: None,
                    ids: None,
                    message: format!("No secrets found for {id}"),
                });
            }

            public_list.push(RoomEntry {
                id: id.clone(),
                site: site.clone(),
                room: room.clone(),
                has_secrets,
                config: strip_secret_keys(&merged_config),
            });
            full_list.push(RoomEntry {
                id: id.clone(),
                site: site.clone(),
                room: room.clone(),
                has_secrets,
                config: merged_config.clone(),
            });
            full_by_id.insert(id, merged_config.clone());

            merged
                .entry(site.clone())
                .or_default()
                .insert(room.clone(), merged_config);
        }
    }

    // Secrets declared for rooms that do not exist publicly are a warning,
    // not an error: the public tree alone defines existence.
    if let Some(secrets_map) = secrets_tree.as_object() {
        for (site, rooms_raw) in secrets_map {
            let Some(rooms_map) = rooms_raw.as_object() else {
                continue;
            };
            for room in rooms_map.keys() {
                let id = format!("{site}/{room}");
                if !seen_ids.contains(&id) {
                    warnings.push(Warning {
                        code: "secrets-extra".to_string(),
                        id: Some(id.clone()),
                        value: None,
                        ids: None,
                        message: format!("Secrets present for undeclared room {id}"),
                    });
                }
            }
        }
    }

    public_list.sort_by(|a, b| a.id.cmp(&b.id));
    full_list.sort_by(|a, b| a.id.cmp(&b.id));

    counts.duplicate_endpoints = collect_duplicates(
        &full_by_id,
        extract_endpoint,
        "duplicate-endpoint",
        &mut warnings,
    );
    counts.duplicate_stream_sources = collect_duplicates(
        &full_by_id,
        extract_stream_source,
        "duplicate-stream-source",
        &mut warnings,
    );

    Snapshot {
        warnings,
        counts,
        merged,
        public_list,
        full_list,
    }
}

fn collect_duplicates(
    full_by_id: &BTreeMap<String, Value>,
    extractor: fn(&Value) -> Option<String>,
    code: &str,
    warnings: &mut Vec<Warning>,
) -> usize {
    let mut by_value: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
    for (id, config) in full_by_id {
        let Some(value) = extractor(config) else {
            continue;
        };
        let key = value.trim().to_lowercase();
        by_value
            .entry(key)
            .or_insert_with(|| (value.trim().to_string(), Vec::new()))
            .1
            .push(id.clone());
    }

    let mut duplicates = 0;
    for (raw, ids) in by_value.into_values() {
        if ids.len() <= 1 {
            continue;
        }
        duplicates += 1;
        warnings.push(Warning {
            code: code.to_string(),
            id: None,
            value: Some(raw.clone()),
            ids: Some(ids.clone()),
            message: format!("Value '{}' repeated across {}", raw, ids.join(", ")),
        });
    }
    duplicates
}

struct CachedSnapshot {
    at: Instant,
    snapshot: Arc<Snapshot>,
}

/// Reads, merges and caches the rooms configuration. The cache bounds how
/// often the files are re-read; `invalidate` forces a fresh read after an
/// administrative change.
pub struct RoomsResolver {
    public_path: PathBuf,
    secrets_path: PathBuf,
    ttl: Duration,
    cache: RwLock<Option<CachedSnapshot>>,
}

impl RoomsResolver {
    pub fn new(public_path: PathBuf, secrets_path: PathBuf, ttl: Duration) -> Self {
        Self {
            public_path,
            secrets_path,
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub async fn snapshot(&self) -> Result<Arc<Snapshot>, ErrorKind> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.at.elapsed() < self.ttl {
                    return Ok(cached.snapshot.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if cached.at.elapsed() < self.ttl {
                return Ok(cached.snapshot.clone());
            }
        }

        let public_tree = self.read_tree(&self.public_path, false).await?;
        let secrets_tree = self.read_tree(&self.secrets_path, true).await?;

        let snapshot = Arc::new(build_snapshot(&public_tree, &secrets_tree));
        debug!(
            rooms = snapshot.counts.total_rooms,
            warnings = snapshot.warnings.len(),
            "Rooms snapshot rebuilt"
        );

        *cache = Some(CachedSnapshot {
            at: Instant::now(),
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    async fn read_tree(&self, path: &PathBuf, optional: bool) -> Result<Value, ErrorKind> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && optional => {
                return Ok(Value::Object(serde_json::Map::new()));
            }
            Err(e) => {
                return Err(ErrorKind::ConfigLoadFailed(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }

        serde_json::from_str(&raw).map_err(|e| {
            ErrorKind::ConfigLoadFailed(format!("cannot parse {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_trees() -> (Value, Value) {
        let public = json!({
            "central": {
                "room1": {"ws": "ws://10.0.0.1:4455", "enabled": true},
                "room2": {"ws": "ws://10.0.0.2:4455"},
                "room3": {"needsSecrets": false, "enabled": false}
            },
            "north": {
                "room1": {"ws": "ws://10.0.0.1:4455"}
            }
        });
        let secrets = json!({
            "central": {
                "room1": {"password": "pw1"},
                "ghost": {"password": "pw2"}
            }
        });
        (public, secrets)
    }

    #[test]
    fn test_snapshot_counts_and_warnings() {
        let (public, secrets) = sample_trees();
        let snap = build_snapshot(&public, &secrets);

        assert_eq!(snap.counts.total_sites, 2);
        assert_eq!(snap.counts.total_rooms, 4);
        assert_eq!(snap.counts.with_secrets, 1);
        // room2 and north/room1 require secrets and have none; room3 is
        // disabled so it does not count.
        assert_eq!(snap.counts.missing_secrets, 2);
        assert_eq!(snap.counts.duplicate_endpoints, 1);

        let codes: Vec<&str> = snap.warnings.iter().map(|w| w.code.as_str()).collect();
        assert!(codes.contains(&"missing-secrets"));
        assert!(codes.contains(&"secrets-extra"));
        assert!(codes.contains(&"duplicate-endpoint"));
    }

    #[test]
    fn test_lists_are_sorted_and_sanitized() {
        let (public, secrets) = sample_trees();
        let snap = build_snapshot(&public, &secrets);

        let ids: Vec<&str> = snap.public_list.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["central/room1", "central/room2", "central/room3", "north/room1"]
        );

        let room1 = &snap.public_list[0];
        assert!(room1.has_secrets);
        assert!(room1.config.get("password").is_none());

        let full_room1 = &snap.full_list[0];
        assert_eq!(
            full_room1.config.get("password").and_then(Value::as_str),
            Some("pw1")
        );
    }

    #[test]
    fn test_device_target_shares_connection_for_shared_endpoint() {
        let (public, secrets) = sample_trees();
        let snap = build_snapshot(&public, &secrets);

        let t2 = snap.device_target("central", "room2").unwrap();
        let t_north = snap.device_target("north", "room1").unwrap();
        assert_eq!(t2.key(), t_north.key());

        let t1 = snap.device_target("central", "room1").unwrap();
        assert_eq!(t1.password, "pw1");
        assert_ne!(t1.key(), t2.key());
    }

    #[test]
    fn test_unknown_room_is_not_configured() {
        let (public, secrets) = sample_trees();
        let snap = build_snapshot(&public, &secrets);
        assert!(matches!(
            snap.device_target("central", "room99"),
            Err(ErrorKind::RoomNotConfigured { .. })
        ));
    }

    #[test]
    fn test_endpoint_extraction_shapes() {
        assert_eq!(
            extract_endpoint(&json!({"ws": "ws://a:1"})),
            Some("ws://a:1".to_string())
        );
        assert_eq!(
            extract_endpoint(&json!({"obs": {"ws": "ws://b:2"}})),
            Some("ws://b:2".to_string())
        );
        assert_eq!(
            extract_endpoint(&json!({"obs": {"ws": {"url": "ws://c:3"}}})),
            Some("ws://c:3".to_string())
        );
        assert_eq!(
            extract_endpoint(&json!({"obs": {"ws": {"host": "d", "port": 4455}}})),
            Some("ws://d:4455".to_string())
        );
        assert_eq!(extract_endpoint(&json!({"enabled": true})), None);
    }

    #[tokio::test]
    async fn test_resolver_missing_public_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let resolver = RoomsResolver::new(
            dir.path().join("rooms.json"),
            dir.path().join("rooms.secrets.json"),
            Duration::from_secs(60),
        );
        assert!(matches!(
            resolver.snapshot().await,
            Err(ErrorKind::ConfigLoadFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_resolver_caches_until_invalidated() {
        let dir = tempfile::TempDir::new().unwrap();
        let public = dir.path().join("rooms.json");
        std::fs::write(&public, r#"{"central": {"room1": {"ws": "ws://a:1"}}}"#).unwrap();

        let resolver = RoomsResolver::new(
            public.clone(),
            dir.path().join("rooms.secrets.json"),
            Duration::from_secs(300),
        );

        let first = resolver.snapshot().await.unwrap();
        assert_eq!(first.counts.total_rooms, 1);

        // Changing the file is invisible while the cache is warm.
        std::fs::write(
            &public,
            r#"{"central": {"room1": {"ws": "ws://a:1"}, "room2": {"ws": "ws://b:2"}}}"#,
        )
        .unwrap();
        let cached = resolver.snapshot().await.unwrap();
        assert_eq!(cached.counts.total_rooms, 1);

        resolver.invalidate().await;
        let fresh = resolver.snapshot().await.unwrap();
        assert_eq!(fresh.counts.total_rooms, 2);
    }
}
