//! # Cleanup Operation
//!
//! Time-windowed migration/removal of stale derived frame/metadata rows.
//! Walks ascending (oldest instances first) over the watermark bounds of
//! the instances created before the staleness cutoff. The store read-checks
//! each instance's derived data before mutating, so re-dispatched windows
//! converge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::{accumulate_completed, BatchingOptions, OperationKind, WatermarkRange};
use crate::orchestration::batch_source::{BatchSource, RangeCursor, RangeWindowedSource};
use crate::orchestration::checkpoint::{range_percent_complete, OperationCheckpoint};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::operation::{Acquisition, BatchOperation};
use crate::store::{IndexDataStore, WatermarkFilter};

/// Caller-supplied parameters of a cleanup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRequest {
    /// Derived data of instances created before this time is eligible.
    pub stale_before: DateTime<Utc>,
    pub batching: BatchingOptions,
}

/// Self-describing unit of cleanup work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupBatch {
    pub range: WatermarkRange,
    pub stale_before: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupCheckpoint {
    pub batching: BatchingOptions,
    pub created_time: Option<DateTime<Utc>>,
    pub stale_before: DateTime<Utc>,
    /// Fixed `[min, max]` bounds of the eligible instances, resolved once.
    pub bound: Option<WatermarkRange>,
    /// Set once the bounds have been resolved, so an empty store is not
    /// re-queried on a re-driven run.
    pub bound_resolved: bool,
    pub completed: Option<WatermarkRange>,
}

impl CleanupCheckpoint {
    pub fn from_request(request: CleanupRequest) -> Self {
        Self {
            batching: request.batching,
            created_time: None,
            stale_before: request.stale_before,
            bound: None,
            bound_resolved: false,
            completed: None,
        }
    }
}

impl OperationCheckpoint for CleanupCheckpoint {
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

pub struct CleanupOperation {
    store: Arc<dyn IndexDataStore>,
}

impl CleanupOperation {
    pub fn new(store: Arc<dyn IndexDataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BatchOperation for CleanupOperation {
    type Checkpoint = CleanupCheckpoint;
    type Batch = CleanupBatch;
    type BatchResult = WatermarkRange;

    fn kind(&self) -> OperationKind {
        OperationKind::Cleanup
    }

    async fn prepare(
        &self,
        operation_id: Uuid,
        mut checkpoint: CleanupCheckpoint,
    ) -> OrchestrationResult<CleanupCheckpoint> {
        if !checkpoint.bound_resolved {
            checkpoint.bound = self
                .store
                .watermark_bounds(&WatermarkFilter::CreatedBefore(checkpoint.stale_before))
                .await?;
            checkpoint.bound_resolved = true;
            info!(
                operation_id = %operation_id,
                stale_before = %checkpoint.stale_before,
                bound = ?checkpoint.bound,
                "Cleanup run prepared"
            );
        }
        Ok(checkpoint)
    }

    async fn acquire_batches(
        &self,
        _operation_id: Uuid,
        checkpoint: &CleanupCheckpoint,
    ) -> OrchestrationResult<Acquisition<CleanupBatch, CleanupCheckpoint>> {
        let source = RangeWindowedSource::ascending(checkpoint.batching.size());
        let cursor = RangeCursor {
            bound: checkpoint.bound,
            completed: checkpoint.completed,
        };
        let set = source
            .next_batches(&cursor, checkpoint.batching.max_parallel_count())
            .await?;
        let batches = set
            .batches
            .into_iter()
            .map(|range| CleanupBatch {
                range,
                stale_before: checkpoint.stale_before,
            })
            .collect();
        Ok(Acquisition {
            batches,
            checkpoint: checkpoint.clone(),
        })
    }

    async fn process_batch(
        &self,
        _operation_id: Uuid,
        batch: &CleanupBatch,
    ) -> OrchestrationResult<WatermarkRange> {
        self.store
            .cleanup_window(batch.range, batch.stale_before)
            .await?;
        Ok(batch.range)
    }

    fn merge_progress(
        &self,
        mut checkpoint: CleanupCheckpoint,
        results: Vec<WatermarkRange>,
    ) -> OrchestrationResult<CleanupCheckpoint> {
        checkpoint.completed = Some(
            accumulate_completed(checkpoint.completed, results)
                .ok_or(OrchestrationError::NonContiguousProgress)?,
        );
        Ok(checkpoint)
    }

    async fn finalize(
        &self,
        operation_id: Uuid,
        checkpoint: &CleanupCheckpoint,
    ) -> OrchestrationResult<()> {
        info!(
            operation_id = %operation_id,
            cleaned = checkpoint.completed.map(|range| range.span()).unwrap_or(0),
            "Cleanup run completed"
        );
        Ok(())
    }
}
