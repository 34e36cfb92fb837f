//! # Orchestration Loop
//!
//! The per-cycle state machine every background operation instantiates:
//!
//! ```text
//! Start → AcquireBatches → Dispatch → Merge → {Continue | Finalize} → Terminated
//! ```
//!
//! One invocation of [`OperationLoop::run_cycle`] executes exactly one pass.
//! A non-empty batch set dispatches every batch concurrently (bounded by the
//! set size, itself bounded by `max_parallel_count`), waits for all of them,
//! merges their results into a new checkpoint, and asks the caller to
//! *continue*: re-invoke the loop fresh with the merged checkpoint,
//! discarding this cycle's execution history. An empty batch set runs the
//! finalize activity exactly once, under its own retry policy, and
//! terminates.
//!
//! The loop suspends in exactly two places: awaiting the batch source and
//! awaiting the joined set of dispatched batch invocations. Nothing is
//! persisted mid-cycle; a crash between dispatch and merge re-dispatches the
//! same windows, relying on processor idempotence.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::orchestration::checkpoint::OperationCheckpoint;
use crate::orchestration::errors::OrchestrationResult;
use crate::orchestration::operation::BatchOperation;
use crate::orchestration::retry::RetryPolicy;

/// Retry budgets for the loop's activities.
#[derive(Debug, Clone, Copy)]
pub struct LoopPolicies {
    /// Applied to batch acquisition and to every batch processor invocation.
    pub batch_retry: RetryPolicy,
    /// Applied to the finalize activity; exhausting it fails the run
    /// terminally even though all data batches succeeded.
    pub finalize_retry: RetryPolicy,
}

impl Default for LoopPolicies {
    fn default() -> Self {
        Self {
            batch_retry: RetryPolicy::default(),
            finalize_retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one orchestration cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome<K> {
    /// The cycle processed a non-empty batch set; re-invoke the loop with
    /// the merged checkpoint.
    Continue(K),
    /// The batch set was empty; the finalize activity ran and the operation
    /// is terminal.
    Finalized(K),
}

/// The orchestration engine for one operation kind.
pub struct OperationLoop<O: BatchOperation> {
    operation: Arc<O>,
    policies: LoopPolicies,
}

impl<O: BatchOperation> OperationLoop<O> {
    pub fn new(operation: Arc<O>, policies: LoopPolicies) -> Self {
        Self {
            operation,
            policies,
        }
    }

    pub fn operation(&self) -> &Arc<O> {
        &self.operation
    }

    /// Run one `AcquireBatches → Dispatch → Merge` pass.
    #[instrument(skip(self, checkpoint), fields(operation_id = %operation_id, kind = %self.operation.kind()))]
    pub async fn run_cycle(
        &self,
        operation_id: Uuid,
        checkpoint: &O::Checkpoint,
    ) -> OrchestrationResult<CycleOutcome<O::Checkpoint>> {
        let max_parallel = checkpoint.batching().max_parallel_count();

        let acquisition = self
            .policies
            .batch_retry
            .execute("acquire_batches", || {
                self.operation.acquire_batches(operation_id, checkpoint)
            })
            .await?;

        if acquisition.batches.is_empty() {
            info!(
                operation_id = %operation_id,
                kind = %self.operation.kind(),
                "Batch set empty, finalizing operation"
            );
            self.policies
                .finalize_retry
                .execute("finalize", || {
                    self.operation.finalize(operation_id, &acquisition.checkpoint)
                })
                .await?;
            return Ok(CycleOutcome::Finalized(acquisition.checkpoint));
        }

        debug!(
            operation_id = %operation_id,
            batches = acquisition.batches.len(),
            max_parallel = max_parallel,
            "Dispatching batch set"
        );

        // Bounded parallelism: one in-flight invocation per acquired batch,
        // and the source never returns more than max_parallel_count batches.
        // join_all waits for every invocation even when one fails early.
        let dispatched = acquisition.batches.iter().map(|batch| {
            self.policies
                .batch_retry
                .execute("process_batch", || {
                    self.operation.process_batch(operation_id, batch)
                })
        });
        let results = join_all(dispatched).await;

        let mut succeeded = Vec::with_capacity(results.len());
        for result in results {
            succeeded.push(result?);
        }

        let merged = self
            .operation
            .merge_progress(acquisition.checkpoint, succeeded)?;

        debug!(
            operation_id = %operation_id,
            percent_complete = merged.percent_complete(),
            "Cycle merged, continuing as new"
        );
        Ok(CycleOutcome::Continue(merged))
    }

    /// Drive a run from a fresh checkpoint to termination without external
    /// persistence: `prepare` once, then cycles until finalize.
    ///
    /// The durable path lives in the operation runtime, which persists the
    /// checkpoint between cycles and honors cancellation; this driver is the
    /// in-process equivalent used by tests and embedded callers.
    pub async fn run_to_completion(
        &self,
        operation_id: Uuid,
        checkpoint: O::Checkpoint,
    ) -> OrchestrationResult<O::Checkpoint> {
        let mut checkpoint = self.operation.prepare(operation_id, checkpoint).await?;
        loop {
            match self.run_cycle(operation_id, &checkpoint).await? {
                CycleOutcome::Continue(next) => checkpoint = next,
                CycleOutcome::Finalized(done) => return Ok(done),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    use crate::models::{
        accumulate_completed, BatchingOptions, OperationKind, WatermarkRange,
    };
    use crate::orchestration::batch_source::{
        BatchSource, RangeCursor, RangeWindowedSource,
    };
    use crate::orchestration::checkpoint::range_percent_complete;
    use crate::orchestration::errors::OrchestrationError;
    use crate::orchestration::operation::Acquisition;
    use crate::orchestration::retry::{Backoff, RetryPolicy};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct WindowCheckpoint {
        batching: BatchingOptions,
        created_time: Option<DateTime<Utc>>,
        bound: Option<WatermarkRange>,
        completed: Option<WatermarkRange>,
    }

    impl OperationCheckpoint for WindowCheckpoint {
        fn batching(&self) -> BatchingOptions {
            self.batching
        }
        fn created_time(&self) -> Option<DateTime<Utc>> {
            self.created_time
        }
        fn set_created_time(&mut self, created_time: DateTime<Utc>) {
            self.created_time = Some(created_time);
        }
        fn percent_complete(&self) -> Option<u8> {
            range_percent_complete(self.completed, self.bound)
        }
    }

    /// Minimal range-windowed operation: counts watermarks it touches and
    /// how often it finalizes. `fail_batches` makes every processor call
    /// fail to exercise the error path.
    struct CountingOperation {
        source: RangeWindowedSource,
        processed: AtomicU64,
        finalized: AtomicU32,
        fail_batches: bool,
    }

    impl CountingOperation {
        fn new(size: u64) -> Self {
            Self {
                source: RangeWindowedSource::descending(size),
                processed: AtomicU64::new(0),
                finalized: AtomicU32::new(0),
                fail_batches: false,
            }
        }
    }

    #[async_trait]
    impl BatchOperation for CountingOperation {
        type Checkpoint = WindowCheckpoint;
        type Batch = WatermarkRange;
        type BatchResult = WatermarkRange;

        fn kind(&self) -> OperationKind {
            OperationKind::Reindex
        }

        async fn acquire_batches(
            &self,
            _operation_id: Uuid,
            checkpoint: &WindowCheckpoint,
        ) -> OrchestrationResult<Acquisition<WatermarkRange, WindowCheckpoint>> {
            let cursor = RangeCursor {
                bound: checkpoint.bound,
                completed: checkpoint.completed,
            };
            let set = self
                .source
                .next_batches(&cursor, checkpoint.batching.max_parallel_count())
                .await?;
            Ok(Acquisition {
                batches: set.batches,
                checkpoint: checkpoint.clone(),
            })
        }

        async fn process_batch(
            &self,
            _operation_id: Uuid,
            batch: &WatermarkRange,
        ) -> OrchestrationResult<WatermarkRange> {
            if self.fail_batches {
                return Err(OrchestrationError::InvalidInput("boom".into()));
            }
            self.processed.fetch_add(batch.span(), Ordering::SeqCst);
            Ok(*batch)
        }

        fn merge_progress(
            &self,
            mut checkpoint: WindowCheckpoint,
            results: Vec<WatermarkRange>,
        ) -> OrchestrationResult<WindowCheckpoint> {
            checkpoint.completed = Some(
                accumulate_completed(checkpoint.completed, results)
                    .ok_or(OrchestrationError::NonContiguousProgress)?,
            );
            Ok(checkpoint)
        }

        async fn finalize(
            &self,
            _operation_id: Uuid,
            _checkpoint: &WindowCheckpoint,
        ) -> OrchestrationResult<()> {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn checkpoint_over(bound: Option<WatermarkRange>) -> WindowCheckpoint {
        WindowCheckpoint {
            batching: BatchingOptions::new(5, 3).unwrap(),
            created_time: None,
            bound,
            completed: None,
        }
    }

    fn test_policies() -> LoopPolicies {
        LoopPolicies {
            batch_retry: RetryPolicy::new(2, Backoff::None),
            finalize_retry: RetryPolicy::new(2, Backoff::None),
        }
    }

    #[tokio::test]
    async fn full_run_covers_range_and_finalizes_once() {
        let operation = Arc::new(CountingOperation::new(5));
        let engine = OperationLoop::new(operation.clone(), test_policies());
        let bound = WatermarkRange::new(1, 50).unwrap();

        let done = engine
            .run_to_completion(Uuid::new_v4(), checkpoint_over(Some(bound)))
            .await
            .unwrap();

        assert_eq!(done.completed, Some(bound));
        assert_eq!(done.percent_complete(), Some(100));
        assert_eq!(operation.processed.load(Ordering::SeqCst), 50);
        assert_eq!(operation.finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn progress_is_monotonic_across_cycles() {
        let operation = Arc::new(CountingOperation::new(5));
        let engine = OperationLoop::new(operation, test_policies());
        let id = Uuid::new_v4();
        let mut checkpoint =
            checkpoint_over(Some(WatermarkRange::new(1, 50).unwrap()));

        let mut last_span = 0;
        loop {
            match engine.run_cycle(id, &checkpoint).await.unwrap() {
                CycleOutcome::Continue(next) => {
                    let span = next.completed.map_or(0, |range| range.span());
                    assert!(span >= last_span, "progress regressed: {span} < {last_span}");
                    last_span = span;
                    checkpoint = next;
                }
                CycleOutcome::Finalized(_) => break,
            }
        }
        assert_eq!(last_span, 50);
    }

    #[tokio::test]
    async fn empty_first_cycle_skips_straight_to_finalize() {
        // No matching data at all: the first acquisition is empty, the
        // finalize activity still runs exactly once, and no batch is
        // processed.
        let operation = Arc::new(CountingOperation::new(5));
        let engine = OperationLoop::new(operation.clone(), test_policies());

        let outcome = engine
            .run_cycle(Uuid::new_v4(), &checkpoint_over(None))
            .await
            .unwrap();

        assert!(matches!(outcome, CycleOutcome::Finalized(_)));
        assert_eq!(operation.processed.load(Ordering::SeqCst), 0);
        assert_eq!(operation.finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_batch_fails_the_cycle_without_finalizing() {
        let mut operation = CountingOperation::new(5);
        operation.fail_batches = true;
        let operation = Arc::new(operation);
        let engine = OperationLoop::new(operation.clone(), test_policies());

        let checkpoint = checkpoint_over(Some(WatermarkRange::new(1, 50).unwrap()));
        let error = engine
            .run_cycle(Uuid::new_v4(), &checkpoint)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            OrchestrationError::RetriesExhausted { .. }
        ));
        assert_eq!(operation.finalized.load(Ordering::SeqCst), 0);
    }
}
