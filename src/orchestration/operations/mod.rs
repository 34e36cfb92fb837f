//! # Operation Specializations
//!
//! The five background operations, each a thin layer over the shared
//! orchestration loop: a checkpoint struct, a self-describing batch
//! descriptor, and the store calls that do the actual work.

pub mod attribute_delete;
pub mod cleanup;
pub mod copy;
pub mod export;
pub mod reindex;

pub use attribute_delete::{
    AttributeDeleteBatch, AttributeDeleteCheckpoint, AttributeDeleteOperation,
    AttributeDeleteRequest,
};
pub use cleanup::{CleanupBatch, CleanupCheckpoint, CleanupOperation, CleanupRequest};
pub use copy::{BlobCopyCheckpoint, BlobCopyOperation, BlobCopyRequest};
pub use export::{
    ExportBatch, ExportCheckpoint, ExportOperation, ExportProgress, ExportRequest,
};
pub use reindex::{ReindexBatch, ReindexCheckpoint, ReindexOperation, ReindexRequest};
