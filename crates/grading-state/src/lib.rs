//! Grading-State: session persistence for the grading pipeline
//!
//! This crate is the storage layer underneath the grading orchestrator. It
//! knows nothing about rubrics or grades: a pipeline run is persisted as an
//! opaque JSON document keyed by session id, tagged with its current stage
//! and a monotonically increasing revision.
//!
//! ## Key Components
//!
//! - `SessionStore`: async key-value contract (`put` / `get` / `list` / `delete`)
//! - `MemorySessionStore`: in-memory fake for tests and ephemeral use
//! - `SurrealSessionStore`: SurrealDB backend (`mem://`, `surrealkv://`, remote)

mod error;
pub mod fakes;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fakes::MemorySessionStore;
pub use handle::{CloudConfig, SurrealHandle, DEFAULT_LOCAL_PATH};
pub use schema::SessionRow;
pub use storage_traits::{ContentDigest, SessionId, SessionRecord, SessionStore, StorageResult};
pub use surreal_store::SurrealSessionStore;

/// Result type for grading-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
