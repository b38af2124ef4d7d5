//! Persistence adapter: stores [`PipelineRun`]s through a [`SessionStore`].
//!
//! Each run is written as one JSON document tagged with its stage label, so
//! the store can list runs by stage without understanding the payload.

use std::sync::Arc;

use grading_state::{SessionId, SessionRecord, SessionStore, StorageError};

use crate::domain::{GradingResult, PipelineRun, Stage};

/// Typed view over a [`SessionStore`].
#[derive(Clone)]
pub struct RunStore {
    store: Arc<dyn SessionStore>,
}

impl RunStore {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Load a run, or `None` if the session id is unknown.
    pub async fn load(&self, session_id: &SessionId) -> GradingResult<Option<PipelineRun>> {
        let record = match self.store.get(session_id).await {
            Ok(record) => record,
            Err(StorageError::SessionNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut run: PipelineRun = serde_json::from_value(record.payload)?;
        run.revision = record.revision;
        Ok(Some(run))
    }

    /// Persist `run` as its next revision.
    ///
    /// On failure the in-memory revision is rolled back so the caller's copy
    /// still matches what is stored.
    pub async fn save(&self, run: &mut PipelineRun) -> GradingResult<()> {
        run.revision += 1;
        let result = self.write(run).await;
        if result.is_err() {
            run.revision -= 1;
        }
        result
    }

    async fn write(&self, run: &PipelineRun) -> GradingResult<()> {
        let record = SessionRecord {
            session_id: run.session_id.clone(),
            stage: run.stage.as_str().to_string(),
            revision: run.revision,
            payload: serde_json::to_value(run)?,
            created_at: run.created_at,
            updated_at: run.updated_at,
        };
        self.store.put(record).await?;
        Ok(())
    }

    /// Runs in `stage` (or all runs), most recently updated first.
    pub async fn list(&self, stage: Option<Stage>) -> GradingResult<Vec<PipelineRun>> {
        let records = self.store.list(stage.as_ref().map(Stage::as_str)).await?;
        records
            .into_iter()
            .map(|record| {
                let mut run: PipelineRun = serde_json::from_value(record.payload)?;
                run.revision = record.revision;
                Ok(run)
            })
            .collect()
    }
}
