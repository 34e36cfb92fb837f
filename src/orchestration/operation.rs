//! # Batch Operation Contract
//!
//! The surface one operation kind exposes to the orchestration loop: how to
//! prepare a fresh run, acquire the next batch set, process one batch, merge
//! a cycle's results into the checkpoint, and finalize once no batches
//! remain. Every processor invocation must be idempotent: the engine
//! guarantees at-least-once execution, never exactly-once.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::OperationKind;
use crate::orchestration::checkpoint::OperationCheckpoint;
use crate::orchestration::errors::OrchestrationResult;

/// Batches acquired for one cycle, paired with the checkpoint whose
/// batch-source cursor has been advanced past them.
///
/// Progress is *not* merged yet; the engine persists nothing until every
/// batch in the set has succeeded, so a crash between dispatch and merge
/// re-dispatches the same still-unprocessed window on resumption.
#[derive(Debug, Clone)]
pub struct Acquisition<B, K> {
    pub batches: Vec<B>,
    pub checkpoint: K,
}

/// One background-operation kind, as seen by the orchestration loop.
#[async_trait]
pub trait BatchOperation: Send + Sync {
    type Checkpoint: OperationCheckpoint + 'static;
    /// Self-describing batch descriptor; retried and re-run without
    /// consulting orchestration state.
    type Batch: Clone + Send + Sync + 'static;
    type BatchResult: Send + 'static;

    fn kind(&self) -> OperationKind;

    /// One-time setup before the first cycle: resolve the fixed watermark
    /// bound, register attribute definitions, create progress rows. Runs
    /// once per run, not per continuation.
    async fn prepare(
        &self,
        operation_id: Uuid,
        checkpoint: Self::Checkpoint,
    ) -> OrchestrationResult<Self::Checkpoint> {
        let _ = operation_id;
        Ok(checkpoint)
    }

    /// Ask the operation's batch source for up to
    /// `checkpoint.batching().max_parallel_count()` batches.
    async fn acquire_batches(
        &self,
        operation_id: Uuid,
        checkpoint: &Self::Checkpoint,
    ) -> OrchestrationResult<Acquisition<Self::Batch, Self::Checkpoint>>;

    /// Perform one bounded unit of work. Must converge when invoked more
    /// than once for the same descriptor.
    async fn process_batch(
        &self,
        operation_id: Uuid,
        batch: &Self::Batch,
    ) -> OrchestrationResult<Self::BatchResult>;

    /// Fold a fully successful cycle's results into the cursor-advanced
    /// checkpoint. Progress must be monotonically non-decreasing.
    fn merge_progress(
        &self,
        checkpoint: Self::Checkpoint,
        results: Vec<Self::BatchResult>,
    ) -> OrchestrationResult<Self::Checkpoint>;

    /// The single terminal activity marking the run's domain-level
    /// completion. Invoked exactly once, only after a cycle observes an
    /// empty batch set.
    async fn finalize(
        &self,
        operation_id: Uuid,
        checkpoint: &Self::Checkpoint,
    ) -> OrchestrationResult<()>;
}
