//! SurrealDB schema initialization
//!
//! Safe to call on every connection (idempotent).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all grading-state tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing grading-state SurrealDB schema");
    init_sessions_table(db).await?;
    info!("grading-state schema initialization complete");
    Ok(())
}

/// Initialize `grading_sessions` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE grading_sessions {
///   session_id:    STRING (unique)
///   stage:         STRING (indexed)
///   revision:      INT
///   payload_json:  STRING
///   created_at:    DATETIME
///   updated_at:    DATETIME (indexed)
/// }
/// ```
///
/// Revision monotonicity is enforced by the store's conditional `UPDATE`;
/// the unique index settles concurrent first writes.
async fn init_sessions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing grading_sessions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS grading_sessions SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_session_id ON TABLE grading_sessions COLUMNS session_id UNIQUE;

        -- Listing suspended runs filters by stage
        DEFINE INDEX IF NOT EXISTS idx_stage ON TABLE grading_sessions COLUMNS stage;

        DEFINE INDEX IF NOT EXISTS idx_updated_at ON TABLE grading_sessions COLUMNS updated_at;
    "#;

    db.query(sql).await?.check()?;
    info!("grading_sessions table initialized");
    Ok(())
}
