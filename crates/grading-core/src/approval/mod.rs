//! Human approval gate for edge-case grades.
//!
//! Grades outside the configured band are held at an [`ApprovalGate`] until a
//! reviewer confirms or rejects them. The gate is part of the persisted run,
//! so a suspended run holds no task, lock or connection while it waits.

pub mod gate;
pub mod summary;

pub use gate::{ApprovalGate, GateError, GateState, Resolution};
pub use summary::{ApprovalSummary, CriterionLine, PendingApproval};
