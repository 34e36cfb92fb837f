//! # Data Model
//!
//! Value types shared across the orchestration engine and its collaborators.

pub mod attribute;
pub mod batching;
pub mod operation;
pub mod watermark;

pub use attribute::{
    AttributeDefinition, AttributeOperation, AttributeOperationStatus, AttributeStatus,
    AttributeValueType, SearchableAttribute,
};
pub use batching::{BatchingOptions, InvalidBatchingOptions};
pub use operation::{OperationKind, OperationStatus};
pub use watermark::{
    accumulate_completed, InvalidWatermarkRange, WatermarkRange, FIRST_WATERMARK,
};
