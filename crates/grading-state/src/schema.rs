//! Schema definitions for grading-state SurrealDB tables
//!
//! Tables:
//! - grading_sessions: one row per pipeline run, keyed by `session_id`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{SessionId, SessionRecord};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Session row as stored in the `grading_sessions` table.
///
/// The run document is kept as a JSON string so the backend never has to
/// interpret the pipeline's own types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Session id (unique)
    pub session_id: String,
    /// Stage label at the time of the write
    pub stage: String,
    /// Writer-supplied revision
    pub revision: u64,
    /// Run document, JSON-encoded
    pub payload_json: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Fields replaced when a newer revision of a session is written.
///
/// `id` and `created_at` stay as first stored.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPatch {
    pub stage: String,
    pub revision: u64,
    pub payload_json: String,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl SessionRow {
    /// The mutable part of this row.
    pub fn patch(&self) -> SessionPatch {
        SessionPatch {
            stage: self.stage.clone(),
            revision: self.revision,
            payload_json: self.payload_json.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Encode a record for storage.
    pub fn from_record(record: &SessionRecord) -> Result<Self, StorageError> {
        Ok(SessionRow {
            id: None,
            session_id: record.session_id.as_str().to_string(),
            stage: record.stage.clone(),
            revision: record.revision,
            payload_json: serde_json::to_string(&record.payload)?,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Decode a stored row.
    pub fn into_record(self) -> Result<SessionRecord, StorageError> {
        Ok(SessionRecord {
            session_id: SessionId::parse(self.session_id)?,
            stage: self.stage,
            revision: self.revision,
            payload: serde_json::from_str(&self.payload_json)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
