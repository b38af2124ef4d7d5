//! SurrealDB-backed SessionStore implementation
//!
//! Uses [`SessionRow`] for persistence, converting to/from
//! [`SessionRecord`] at the boundary.

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;
use crate::handle::SurrealHandle;
use crate::schema::SessionRow;
use crate::storage_traits::{SessionId, SessionRecord, SessionStore, StorageResult};

const TABLE: &str = "grading_sessions";

/// SurrealDB-backed implementation of [`SessionStore`].
#[derive(Clone)]
pub struct SurrealSessionStore {
    handle: SurrealHandle,
}

impl SurrealSessionStore {
    pub fn new(handle: SurrealHandle) -> Self {
        Self { handle }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(SurrealHandle::in_memory().await?))
    }

    /// Open an on-disk store rooted at `path`.
    pub async fn open_local(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        Ok(Self::new(SurrealHandle::open_local(path).await?))
    }

    /// Create from environment variables.
    ///
    /// Uses the same chain as [`SurrealHandle::from_env`].
    pub async fn from_env() -> crate::Result<Self> {
        Ok(Self::new(SurrealHandle::from_env().await?))
    }

    // -- private helpers -----------------------------------------------------

    /// Fetch a row by session id, if present.
    async fn fetch_row(&self, sid: &str) -> StorageResult<Option<SessionRow>> {
        let sid_owned = sid.to_string();
        let mut res = self
            .handle
            .db()
            .query("SELECT * FROM grading_sessions WHERE session_id = $sid")
            .bind(("sid", sid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<SessionRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next())
    }

    /// Overwrite the stored row only if its revision is lower than `row`'s.
    ///
    /// Check and write happen in one statement, so two writers holding the
    /// same revision cannot both succeed. Returns whether a row was updated.
    async fn update_if_newer(&self, row: &SessionRow) -> StorageResult<bool> {
        let mut res = self
            .handle
            .db()
            .query(
                "UPDATE grading_sessions MERGE $patch \
                 WHERE session_id = $sid AND revision < $rev RETURN AFTER",
            )
            .bind(("patch", row.patch()))
            .bind(("sid", row.session_id.clone()))
            .bind(("rev", row.revision))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let updated: Vec<SessionRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if !updated.is_empty() {
            debug!(session_id = %row.session_id, revision = row.revision, "updated session");
        }
        Ok(!updated.is_empty())
    }
}

fn stale(row: &SessionRow, stored: u64) -> StorageError {
    StorageError::StaleRevision {
        session_id: row.session_id.clone(),
        stored,
        attempted: row.revision,
    }
}

#[async_trait]
impl SessionStore for SurrealSessionStore {
    async fn put(&self, record: SessionRecord) -> StorageResult<()> {
        let row = SessionRow::from_record(&record)?;

        if self.update_if_newer(&row).await? {
            return Ok(());
        }
        if let Some(existing) = self.fetch_row(&row.session_id).await? {
            return Err(stale(&row, existing.revision));
        }

        debug!(session_id = %row.session_id, "creating session");
        let created: Result<Option<SessionRow>, _> =
            self.handle.db().create(TABLE).content(row.clone()).await;
        let Err(create_err) = created else {
            return Ok(());
        };

        // Lost a race to create the row; the unique index kept the winner's.
        if self.update_if_newer(&row).await? {
            return Ok(());
        }
        match self.fetch_row(&row.session_id).await? {
            Some(existing) => Err(stale(&row, existing.revision)),
            None => Err(StorageError::Backend(create_err.to_string())),
        }
    }

    async fn get(&self, session_id: &SessionId) -> StorageResult<SessionRecord> {
        self.fetch_row(session_id.as_str())
            .await?
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })?
            .into_record()
    }

    async fn contains(&self, session_id: &SessionId) -> StorageResult<bool> {
        Ok(self.fetch_row(session_id.as_str()).await?.is_some())
    }

    async fn list(&self, stage: Option<&str>) -> StorageResult<Vec<SessionRecord>> {
        let rows: Vec<SessionRow> = if let Some(stage) = stage {
            let stage_owned = stage.to_string();
            let mut res = self
                .handle
                .db()
                .query("SELECT * FROM grading_sessions WHERE stage = $stage ORDER BY updated_at DESC")
                .bind(("stage", stage_owned))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            let mut res = self
                .handle
                .db()
                .query("SELECT * FROM grading_sessions ORDER BY updated_at DESC")
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(SessionRow::into_record).collect()
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<()> {
        let sid_owned = session_id.as_str().to_string();
        self.handle
            .db()
            .query("DELETE grading_sessions WHERE session_id = $sid")
            .bind(("sid", sid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .check()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
