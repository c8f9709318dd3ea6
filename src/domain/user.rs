//! User model as persisted in the credential store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::password::PasswordHash;
use crate::domain::Scope;

/// User role. Ordering of privilege: viewer < operator < admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a user record is managed. External users are read-only through
/// this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserSource {
    #[default]
    Local,
    External,
}

/// A stored user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub password_hash: PasswordHash,
    pub role: Role,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub source: UserSource,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Projection of a user without credential material, as returned by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub username: String,
    pub role: Role,
    pub enabled: bool,
    pub source: UserSource,
    pub note: Option<String>,
    pub scope: Option<Scope>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            username: u.username.clone(),
            role: u.role,
            enabled: u.enabled,
            source: u.source,
            note: u.note.clone(),
            scope: u.scope.clone(),
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        let role: Role = serde_json::from_str("\"operator\"").unwrap();
        assert_eq!(role, Role::Operator);
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }

    #[test]
    fn test_user_deserializes_with_defaults() {
        let raw = r#"{
            "username": "ana",
            "passwordHash": "$2b$12$abcdefghijklmnopqrstuvabcdefghijklmnopqrstuvabcdefghijk",
            "role": "viewer"
        }"#;
        let user: User = serde_json::from_str(raw).unwrap();
        assert!(user.enabled);
        assert_eq!(user.source, UserSource::Local);
        assert!(user.scope.is_none());
    }
}
