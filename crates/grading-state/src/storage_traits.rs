//! Storage trait definitions for grading sessions
//!
//! - `SessionStore`: persisted pipeline runs keyed by session id
//! - `ContentDigest`: SHA-256 fingerprint used to detect conflicting reuse
//!   of a session id
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the compact JSON encoding of a value with object keys
    /// sorted, so equal documents hash equally regardless of key order.
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::from_bytes(canonicalize(value).to_string().as_bytes())
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

const MAX_SESSION_ID_LEN: usize = 128;

/// Identifier of one grading run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id of the form `grading_<8 hex>`.
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        SessionId(format!("grading_{}", &simple[..8]))
    }

    /// Validate a caller-supplied id.
    ///
    /// Accepts 1..=128 characters drawn from ASCII alphanumerics, `-`, `_`,
    /// `.` and `:`.
    pub fn parse(raw: impl Into<String>) -> StorageResult<Self> {
        let raw = raw.into();
        let reason = if raw.is_empty() {
            Some("must not be empty".to_string())
        } else if raw.len() > MAX_SESSION_ID_LEN {
            Some(format!("must be at most {MAX_SESSION_ID_LEN} characters"))
        } else if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        {
            Some(format!("contains unsupported character {c:?}"))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StorageError::InvalidSessionId {
                session_id: raw,
                reason,
            }),
            None => Ok(SessionId(raw)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl std::str::FromStr for SessionId {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// One persisted pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Stage label at the time of the write (e.g. `"awaiting_approval"`).
    pub stage: String,
    /// Bumped by the writer on every transition; the store rejects regressions.
    pub revision: u64,
    /// The serialized run document.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Build a record stamped with the current time for both timestamps.
    pub fn new(
        session_id: SessionId,
        stage: impl Into<String>,
        revision: u64,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            stage: stage.into(),
            revision,
            payload,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistence for grading sessions.
///
/// Guarantees:
/// - `get` returns exactly the last record accepted by `put` for that id.
/// - `put` accepts a record only if no record exists yet or its `revision`
///   is strictly greater than the stored one; otherwise it fails with
///   `StorageError::StaleRevision` and leaves the stored record untouched.
/// - `list` returns records newest `updated_at` first.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the record for `record.session_id`.
    async fn put(&self, record: SessionRecord) -> StorageResult<()>;

    /// Fetch a record. Returns `StorageError::SessionNotFound` if absent.
    async fn get(&self, session_id: &SessionId) -> StorageResult<SessionRecord>;

    /// Check whether a record exists.
    async fn contains(&self, session_id: &SessionId) -> StorageResult<bool>;

    /// List records, optionally filtered by stage label.
    async fn list(&self, stage: Option<&str>) -> StorageResult<Vec<SessionRecord>>;

    /// Delete a record. No-op if absent.
    async fn delete(&self, session_id: &SessionId) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_session_id_shape() {
        let id = SessionId::generate();
        assert!(id.as_str().starts_with("grading_"));
        assert_eq!(id.as_str().len(), "grading_".len() + 8);
        assert!(SessionId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_session_id_rejects_bad_input() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("has space").is_err());
        assert!(SessionId::parse("a".repeat(129)).is_err());
        assert!(SessionId::parse("course-101:essay_3.v2").is_ok());
    }

    #[test]
    fn test_digest_is_stable_for_equal_json() {
        let a = serde_json::json!({"name": "R", "criteria": []});
        let b: serde_json::Value = serde_json::from_str(r#"{"criteria":[],"name":"R"}"#).unwrap();
        assert_eq!(ContentDigest::from_json(&a), ContentDigest::from_json(&b));
    }

    #[test]
    fn test_digest_try_from_validates() {
        let d = ContentDigest::from_bytes(b"x");
        assert!(ContentDigest::try_from(d.as_str().to_string()).is_ok());
        assert!(ContentDigest::try_from("zz".to_string()).is_err());
        assert_eq!(d.short().len(), 12);
    }
}
