//! # Orchestration Errors
//!
//! Error taxonomy for the batch-orchestration engine. Transient store faults
//! live inside the retry budget and never reach these variants unless the
//! budget is exhausted; data-level failures local to one export item are
//! reported as batch results, not errors.

use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A batch or finalize activity kept failing until its retry budget ran
    /// out. Fails the orchestration cycle; no partial checkpoint is persisted.
    #[error("activity '{activity}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        activity: String,
        attempts: u32,
        #[source]
        source: Box<OrchestrationError>,
    },

    #[error("operation instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Merging a cycle's batch results produced a gapped completed range.
    /// Progress must stay contiguous, so this is a defect, never persisted.
    #[error("merged batch windows are not contiguous with prior progress")]
    NonContiguousProgress,

    #[error("invalid operation input: {0}")]
    InvalidInput(String),
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
