//! In-memory fake for [`SessionStore`] (testing and ephemeral use)
//!
//! Satisfies the trait contract without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory session store backed by a `HashMap<session_id, record>`.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, mut record: SessionRecord) -> StorageResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(record.session_id.as_str()) {
            if record.revision <= existing.revision {
                return Err(StorageError::StaleRevision {
                    session_id: record.session_id.to_string(),
                    stored: existing.revision,
                    attempted: record.revision,
                });
            }
            record.created_at = existing.created_at;
        }
        sessions.insert(record.session_id.as_str().to_string(), record);
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> StorageResult<SessionRecord> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(session_id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn contains(&self, session_id: &SessionId) -> StorageResult<bool> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.contains_key(session_id.as_str()))
    }

    async fn list(&self, stage: Option<&str>) -> StorageResult<Vec<SessionRecord>> {
        let sessions = self.sessions.lock().unwrap();
        let mut records: Vec<SessionRecord> = sessions
            .values()
            .filter(|r| stage.map_or(true, |s| r.stage == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.remove(session_id.as_str());
        Ok(())
    }
}
