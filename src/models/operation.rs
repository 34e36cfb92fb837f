//! # Operation Model
//!
//! Identifies the background operation kinds the engine can run and the
//! externally visible status vocabulary used by the operations API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of long-running background operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Backfill index rows for newly defined searchable attributes.
    Reindex,
    /// Duplicate stored binary objects into a new storage layout.
    BlobCopy,
    /// Delete the derived index data for a retired attribute.
    AttributeDelete,
    /// Time-windowed migration/removal of stale derived rows.
    Cleanup,
    /// Bulk export of stored objects to external storage.
    Export,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reindex => write!(f, "reindex"),
            Self::BlobCopy => write!(f, "blob_copy"),
            Self::AttributeDelete => write!(f, "attribute_delete"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Export => write!(f, "export"),
        }
    }
}

/// Externally visible status of an operation instance.
///
/// This is the projection vocabulary, derived from the runtime's own status
/// record; it is deliberately smaller than the runtime's internal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl OperationStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}
