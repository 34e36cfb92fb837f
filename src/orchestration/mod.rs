//! # Orchestration Engine
//!
//! Resumable batch orchestration for dataset-wide background operations.
//!
//! ## Architecture
//!
//! Every operation kind instantiates the same skeleton:
//!
//! - **[`BatchSource`]**: produces the next bounded batch set from a
//!   resumable cursor, either range-windowed over the watermark axis or
//!   queue-dequeue over an external enumerator.
//! - **[`BatchOperation`]**: the operation-specific batch processor plus
//!   prepare/merge/finalize hooks. Processors are idempotent; the engine
//!   guarantees at-least-once execution with exactly-once checkpointing.
//! - **[`OperationLoop`]**: the per-cycle state machine
//!   (`Start → AcquireBatches → Dispatch → Merge → {Continue | Finalize}`).
//! - **[`OperationRuntime`]**: in-process hosting runtime with instance
//!   records, the continuation driver, and cancellation.
//! - **[`StatusProjector`]**: maps runtime status + checkpoint into the
//!   externally visible operation state.
//!
//! ## Core Guarantees
//!
//! - Progress is monotonic and only advances after a cycle's entire batch
//!   set has succeeded; nothing is persisted mid-cycle.
//! - Per-run execution history stays bounded: each cycle ends by restarting
//!   the loop with the merged checkpoint as fresh input.
//! - The finalize activity runs exactly once, only after an empty batch set.

pub mod batch_source;
pub mod checkpoint;
pub mod errors;
pub mod operation;
pub mod operation_loop;
pub mod operations;
pub mod retry;
pub mod runtime;
pub mod status;

pub use batch_source::{
    compute_windows, BatchSet, BatchSource, QueueCursor, QueueDequeueSource, RangeCursor,
    RangeWindowedSource, WalkDirection,
};
pub use checkpoint::{range_percent_complete, OperationCheckpoint};
pub use errors::{OrchestrationError, OrchestrationResult};
pub use operation::{Acquisition, BatchOperation};
pub use operation_loop::{CycleOutcome, LoopPolicies, OperationLoop};
pub use retry::{Backoff, RetryPolicy};
pub use runtime::{OperationInstance, OperationRuntime, RuntimeStatus};
pub use status::{BaseUrlResolver, OperationState, StatusProjector, UrlResolver};
