//! Credential store
//!
//! Users live in a single JSON document. Writes are atomic
//! (write-temp-then-rename) and serialized by an async mutex, so concurrent
//! writers cannot tear the file; last writer wins. Password work (bcrypt)
//! runs under `spawn_blocking` so slow hashing never stalls unrelated
//! requests.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::auth::password::{hash_password_blocking, PasswordHash, MIN_PASSWORD_LEN};
use crate::domain::user::PublicUser;
use crate::domain::{ErrorKind, Role, Scope, User, UserSource};

#[derive(Debug, Serialize, Deserialize, Default)]
struct Document {
    #[serde(default)]
    users: Vec<User>,
}

/// Request to create a local user.
#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub scope: Option<Scope>,
}

/// Partial update. Fields left absent in the JSON body are unchanged;
/// `note`/`scope` distinguish "absent" from an explicit `null` (which
/// clears the field).
#[derive(Debug, Default, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub note: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub scope: Option<Option<Scope>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// File-backed user store.
pub struct UserStore {
    path: PathBuf,
    bcrypt_cost: u32,
    write_lock: Mutex<()>,
}

impl UserStore {
    pub fn new(path: PathBuf, bcrypt_cost: u32) -> Self {
        Self {
            path,
            bcrypt_cost,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_document(&self) -> Result<Document, ErrorKind> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => {
                error!(path = %self.path.display(), "Failed to read user store: {e}");
                return Err(ErrorKind::Internal(format!("user store unreadable: {e}")));
            }
        };

        serde_json::from_str(&raw).map_err(|e| {
            error!(path = %self.path.display(), "User store is corrupt: {e}");
            ErrorKind::Internal(format!("user store unparseable: {e}"))
        })
    }

    /// Atomic write: temp file in the same directory, then rename over the
    /// original. Callers must hold `write_lock`.
    async fn write_document(&self, doc: &Document) -> Result<(), ErrorKind> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ErrorKind::Internal(format!("cannot create store dir: {e}")))?;
        }

        let serialized = serde_json::to_string_pretty(doc)
            .map_err(|e| ErrorKind::Internal(format!("cannot serialize user store: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(|e| ErrorKind::Internal(format!("cannot write user store: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ErrorKind::Internal(format!("cannot replace user store: {e}")))?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<PublicUser>, ErrorKind> {
        let doc = self.read_document().await?;
        Ok(doc.users.iter().map(PublicUser::from).collect())
    }

    pub async fn get(&self, username: &str) -> Result<Option<User>, ErrorKind> {
        let doc = self.read_document().await?;
        Ok(doc.users.into_iter().find(|u| u.username == username))
    }

    pub async fn is_empty(&self) -> Result<bool, ErrorKind> {
        Ok(self.read_document().await?.users.is_empty())
    }

    /// Verify a password for a user. Disabled and unknown users verify
    /// false. A successful verification against a legacy hash transparently
    /// re-hashes with bcrypt and persists the upgrade; a failure of that
    /// persist step is logged and does not fail the verification.
    pub async fn verify_password(
        &self,
        username: &str,
        plaintext: &str,
    ) -> Result<bool, ErrorKind> {
        let Some(user) = self.get(username).await? else {
            return Ok(false);
        };
        if !user.enabled {
            return Ok(false);
        }

        let hash = user.password_hash.clone();
        let candidate = plaintext.to_string();
        let verified = tokio::task::spawn_blocking(move || hash.verify_blocking(&candidate))
            .await
            .map_err(|e| ErrorKind::Internal(format!("hash task failed: {e}")))?;

        if verified && user.password_hash.is_legacy() {
            info!(username, "Upgrading legacy password hash to bcrypt");
            self.upgrade_legacy_hash(username, plaintext).await;
        }

        Ok(verified)
    }

    async fn upgrade_legacy_hash(&self, username: &str, plaintext: &str) {
        let cost = self.bcrypt_cost;
        let plain = plaintext.to_string();
        let rehashed = tokio::task::spawn_blocking(move || hash_password_blocking(&plain, cost))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        match rehashed {
            Ok(new_hash) => {
                if let Err(e) = self.set_password_hash(username, &new_hash).await {
                    warn!(username, "Could not persist upgraded hash: {e}");
                } else {
                    info!(username, "Password hash upgraded");
                }
            }
            Err(e) => warn!(username, "Re-hash for upgrade failed: {e}"),
        }
    }

    async fn set_password_hash(&self, username: &str, new_hash: &str) -> Result<(), ErrorKind> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        let Some(user) = doc.users.iter_mut().find(|u| u.username == username) else {
            return Ok(());
        };
        user.password_hash = PasswordHash::parse(new_hash);
        user.updated_at = Some(Utc::now());
        self.write_document(&doc).await
    }

    pub async fn create(&self, req: NewUser) -> Result<PublicUser, ErrorKind> {
        let username = validate_username(&req.username)?;
        validate_password(&req.password)?;

        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;

        if doc.users.iter().any(|u| u.username == username) {
            return Err(ErrorKind::DuplicateUser(username));
        }

        let cost = self.bcrypt_cost;
        let plain = req.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password_blocking(&plain, cost))
            .await
            .map_err(|e| ErrorKind::Internal(format!("hash task failed: {e}")))?
            .map_err(|e| ErrorKind::Internal(format!("hashing failed: {e}")))?;

        let now = Utc::now();
        let user = User {
            username: username.clone(),
            password_hash: PasswordHash::parse(&password_hash),
            role: req.role,
            enabled: true,
            source: UserSource::Local,
            note: req.note,
            scope: req.scope,
            created_at: Some(now),
            updated_at: Some(now),
        };
        let public = PublicUser::from(&user);

        doc.users.push(user);
        self.write_document(&doc).await?;

        info!(username, role = %public.role, "User created");
        Ok(public)
    }

    pub async fn update(&self, username: &str, updates: UserUpdate) -> Result<PublicUser, ErrorKind> {
        let new_hash = match &updates.password {
            Some(password) => {
                validate_password(password)?;
                let cost = self.bcrypt_cost;
                let plain = password.clone();
                let hashed = tokio::task::spawn_blocking(move || hash_password_blocking(&plain, cost))
                    .await
                    .map_err(|e| ErrorKind::Internal(format!("hash task failed: {e}")))?
                    .map_err(|e| ErrorKind::Internal(format!("hashing failed: {e}")))?;
                Some(hashed)
            }
            None => None,
        };

        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        let Some(user) = doc.users.iter_mut().find(|u| u.username == username) else {
            return Err(ErrorKind::NotFound(username.to_string()));
        };
        if user.source == UserSource::External {
            return Err(ErrorKind::ExternalUserImmutable(username.to_string()));
        }

        if let Some(hash) = new_hash {
            user.password_hash = PasswordHash::parse(&hash);
        }
        if let Some(role) = updates.role {
            user.role = role;
        }
        if let Some(enabled) = updates.enabled {
            user.enabled = enabled;
        }
        if let Some(note) = updates.note {
            user.note = note;
        }
        if let Some(scope) = updates.scope {
            user.scope = scope;
        }
        user.updated_at = Some(Utc::now());

        let public = PublicUser::from(&*user);
        self.write_document(&doc).await?;
        Ok(public)
    }

    pub async fn delete(&self, username: &str) -> Result<(), ErrorKind> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;

        let Some(user) = doc.users.iter().find(|u| u.username == username) else {
            return Err(ErrorKind::NotFound(username.to_string()));
        };
        if user.source == UserSource::External {
            return Err(ErrorKind::ExternalUserImmutable(username.to_string()));
        }

        doc.users.retain(|u| u.username != username);
        self.write_document(&doc).await?;

        info!(username, "User deleted");
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<String, ErrorKind> {
    let clean = username.trim();
    if clean.len() < 3 || clean.len() > 32 {
        return Err(ErrorKind::Validation(
            "username must be 3-32 characters".to_string(),
        ));
    }
    if !clean
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ErrorKind::Validation(
            "username may only contain letters, digits, . _ -".to_string(),
        ));
    }
    Ok(clean.to_string())
}

fn validate_password(password: &str) -> Result<(), ErrorKind> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ErrorKind::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    const TEST_COST: u32 = 4;

    fn store(dir: &TempDir) -> UserStore {
        UserStore::new(dir.path().join("users-roles.json"), TEST_COST)
    }

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: "s3creto".to_string(),
            role: Role::Operator,
            note: None,
            scope: None,
        }
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let created = store.create(new_user("ana")).await.unwrap();
        assert_eq!(created.username, "ana");
        assert!(created.enabled);

        let fetched = store.get("ana").await.unwrap().unwrap();
        assert!(matches!(fetched.password_hash, PasswordHash::Bcrypt(_)));

        let err = store.create(new_user("ana")).await.unwrap_err();
        assert!(matches!(err, ErrorKind::DuplicateUser(_)));
    }

    #[tokio::test]
    async fn test_username_validation() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut bad = new_user("ab");
        assert!(matches!(
            store.create(bad).await.unwrap_err(),
            ErrorKind::Validation(_)
        ));

        bad = new_user("has space");
        assert!(matches!(
            store.create(bad).await.unwrap_err(),
            ErrorKind::Validation(_)
        ));

        bad = new_user("ok.name-1");
        bad.password = "short".to_string();
        assert!(matches!(
            store.create(bad).await.unwrap_err(),
            ErrorKind::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_verify_and_disabled_user() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create(new_user("ana")).await.unwrap();

        assert!(store.verify_password("ana", "s3creto").await.unwrap());
        assert!(!store.verify_password("ana", "wrong").await.unwrap());
        assert!(!store.verify_password("ghost", "s3creto").await.unwrap());

        store
            .update(
                "ana",
                UserUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!store.verify_password("ana", "s3creto").await.unwrap());
    }

    #[tokio::test]
    async fn test_legacy_hash_upgrades_on_successful_verify() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        // Seed a user carrying a legacy SHA-256 hash directly in the file.
        let legacy = hex::encode(Sha256::digest(b"viejopass"));
        let doc = serde_json::json!({
            "users": [{
                "username": "luis",
                "passwordHash": legacy,
                "role": "viewer"
            }]
        });
        std::fs::write(
            dir.path().join("users-roles.json"),
            serde_json::to_string(&doc).unwrap(),
        )
        .unwrap();

        let before = store.get("luis").await.unwrap().unwrap();
        assert!(before.password_hash.is_legacy());

        assert!(store.verify_password("luis", "viejopass").await.unwrap());

        let after = store.get("luis").await.unwrap().unwrap();
        assert!(matches!(after.password_hash, PasswordHash::Bcrypt(_)));
        // Upgraded hash still verifies.
        assert!(store.verify_password("luis", "viejopass").await.unwrap());
        assert!(!store.verify_password("luis", "otrapass").await.unwrap());
    }

    #[tokio::test]
    async fn test_external_user_is_immutable() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let doc = serde_json::json!({
            "users": [{
                "username": "dir.sync",
                "passwordHash": hex::encode(Sha256::digest(b"x")),
                "role": "operator",
                "source": "external"
            }]
        });
        std::fs::write(
            dir.path().join("users-roles.json"),
            serde_json::to_string(&doc).unwrap(),
        )
        .unwrap();

        let err = store
            .update("dir.sync", UserUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ErrorKind::ExternalUserImmutable(_)));

        let err = store.delete("dir.sync").await.unwrap_err();
        assert!(matches!(err, ErrorKind::ExternalUserImmutable(_)));

        // Store unchanged after the refused delete.
        assert!(store.get("dir.sync").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_missing_user() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.delete("nadie").await.unwrap_err(),
            ErrorKind::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_update_clears_note_with_explicit_null() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut req = new_user("ana");
        req.note = Some("turno noche".to_string());
        store.create(req).await.unwrap();

        // Absent note leaves it unchanged.
        let upd: UserUpdate = serde_json::from_str(r#"{"role": "admin"}"#).unwrap();
        let out = store.update("ana", upd).await.unwrap();
        assert_eq!(out.note.as_deref(), Some("turno noche"));
        assert_eq!(out.role, Role::Admin);

        // Explicit null clears.
        let upd: UserUpdate = serde_json::from_str(r#"{"note": null}"#).unwrap();
        let out = store.update("ana", upd).await.unwrap();
        assert!(out.note.is_none());
    }
}
