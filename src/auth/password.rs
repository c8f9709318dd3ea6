//! Password hashing
//!
//! Two formats live in the store: bcrypt (current) and unsalted SHA-256 hex
//! (legacy). The format is sniffed once, when a stored hash is parsed; from
//! then on the variant is explicit. Successful verification against a legacy
//! hash triggers re-hashing with bcrypt in the credential store.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// A stored password hash, tagged by algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordHash {
    /// Modern salted adaptive hash (`$2a$`/`$2b$`/`$2y$`).
    Bcrypt(String),
    /// Legacy fast hash: 64 lowercase hex chars of SHA-256(password).
    LegacySha256(String),
    /// Anything else found in the store. Never verifies.
    Unrecognized(String),
}

impl PasswordHash {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("$2a$") || raw.starts_with("$2b$") || raw.starts_with("$2y$") {
            Self::Bcrypt(raw.to_string())
        } else if raw.len() == 64 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            Self::LegacySha256(raw.to_lowercase())
        } else {
            Self::Unrecognized(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Bcrypt(h) | Self::LegacySha256(h) | Self::Unrecognized(h) => h,
        }
    }

    /// Whether a successful verification should trigger a re-hash.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::LegacySha256(_))
    }

    /// Verify a plaintext against this hash. Blocking (bcrypt is
    /// intentionally slow); run under `spawn_blocking` on request paths.
    pub fn verify_blocking(&self, plaintext: &str) -> bool {
        match self {
            Self::Bcrypt(hash) => bcrypt::verify(plaintext, hash).unwrap_or(false),
            Self::LegacySha256(hash) => {
                let digest = hex::encode(Sha256::digest(plaintext.as_bytes()));
                &digest == hash
            }
            Self::Unrecognized(_) => {
                warn!("Stored password hash has an unrecognized format");
                false
            }
        }
    }
}

impl Serialize for PasswordHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PasswordHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(D::Error::custom("empty password hash"));
        }
        Ok(Self::parse(&raw))
    }
}

/// Hash a password with bcrypt at the given cost. Blocking; run under
/// `spawn_blocking` on request paths.
pub fn hash_password_blocking(plaintext: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plaintext, cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[test]
    fn test_hash_and_verify() {
        let hashed = hash_password_blocking("secure_password_123", TEST_COST).unwrap();
        let parsed = PasswordHash::parse(&hashed);
        assert!(matches!(parsed, PasswordHash::Bcrypt(_)));
        assert!(parsed.verify_blocking("secure_password_123"));
        assert!(!parsed.verify_blocking("wrong_password"));
    }

    #[test]
    fn test_legacy_sha256_verifies() {
        // SHA-256("hunter22")
        let digest = hex::encode(Sha256::digest(b"hunter22"));
        let parsed = PasswordHash::parse(&digest);
        assert!(parsed.is_legacy());
        assert!(parsed.verify_blocking("hunter22"));
        assert!(!parsed.verify_blocking("hunter23"));
    }

    #[test]
    fn test_unrecognized_format_never_verifies() {
        let parsed = PasswordHash::parse("plaintext-oops");
        assert!(matches!(parsed, PasswordHash::Unrecognized(_)));
        assert!(!parsed.verify_blocking("plaintext-oops"));
    }

    #[test]
    fn test_serde_round_trip_preserves_raw_value() {
        let digest = hex::encode(Sha256::digest(b"x"));
        let json = format!("\"{digest}\"");
        let parsed: PasswordHash = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }
}
