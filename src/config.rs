//! Configuration module
//!
//! Reads TOML configuration from `$ROOMCAST_CONFIG` or the platform config
//! directory, with per-section defaults so a partial file is enough.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub paths: PathsConfig,
    pub device: DeviceConfig,
    pub rooms: RoomsConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Secret for signing session tokens. Must be at least 32 characters;
    /// startup refuses to proceed otherwise.
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    /// bcrypt work factor for newly stored password hashes.
    pub bcrypt_cost: u32,
    /// Bootstrap admin created when the user store is empty.
    pub admin_username: String,
    pub admin_password: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiration_hours: 8,
            bcrypt_cost: 12,
            admin_username: "admin".to_string(),
            admin_password: "CHANGE_ME".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub rooms_file: PathBuf,
    pub rooms_secrets_file: PathBuf,
    pub users_file: PathBuf,
    pub record_state_file: PathBuf,
    pub audit_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            rooms_file: PathBuf::from("config/rooms.json"),
            rooms_secrets_file: PathBuf::from("config/rooms.secrets.json"),
            users_file: PathBuf::from("config/users-roles.json"),
            record_state_file: PathBuf::from("state/record-state.json"),
            audit_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bound on establishing a switcher connection, distinct from the
    /// per-operation convergence bound.
    pub connect_timeout_ms: u64,
    /// Bound on a single request/response round-trip over a live connection.
    pub call_timeout_ms: u64,
    /// Delay after issuing a start before the first status poll.
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_attempts: u32,
    /// Retries when the device reports active output with zero bytes.
    pub status_retries: u32,
    /// Pooled connections unused this long are closed by the sweeper.
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1_500,
            call_timeout_ms: 5_000,
            settle_ms: 500,
            poll_interval_ms: 250,
            poll_attempts: 40,
            status_retries: 6,
            idle_ttl_secs: 30 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

impl DeviceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Snapshot cache TTL. Room configuration changes are rare and
    /// operator-triggered; staleness up to the TTL is acceptable.
    pub cache_ttl_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub max_file_bytes: u64,
    pub max_continuations: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * 1024 * 1024,
            max_continuations: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Default config path: `<config dir>/roomcast/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roomcast")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 8081);
        assert_eq!(cfg.security.jwt_expiration_hours, 8);
        assert_eq!(cfg.device.connect_timeout_ms, 1_500);
        assert_eq!(cfg.device.poll_attempts, 40);
        assert_eq!(cfg.rooms.cache_ttl_secs, 60);
        assert_eq!(cfg.audit.max_continuations, 20);
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9090

            [security]
            jwt_secret = "0123456789abcdef0123456789abcdef"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.security.bcrypt_cost, 12);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.server.address(), "127.0.0.1:9090");
    }
}
