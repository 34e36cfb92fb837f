//! # Blob Copy Operation
//!
//! Duplicates the stored binary object for every instance into its new
//! storage location, newest data first. Copies are overwrite-equivalent, so
//! a re-dispatched window converges on the same blob layout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    accumulate_completed, BatchingOptions, OperationKind, WatermarkRange, FIRST_WATERMARK,
};
use crate::orchestration::batch_source::{BatchSource, RangeCursor, RangeWindowedSource};
use crate::orchestration::checkpoint::{range_percent_complete, OperationCheckpoint};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::operation::{Acquisition, BatchOperation};
use crate::store::{BlobMigrationStore, IndexDataStore, WatermarkFilter};

/// Caller-supplied parameters of a copy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobCopyRequest {
    pub batching: BatchingOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobCopyCheckpoint {
    pub batching: BatchingOptions,
    pub created_time: Option<DateTime<Utc>>,
    pub end_watermark: Option<i64>,
    pub completed: Option<WatermarkRange>,
}

impl BlobCopyCheckpoint {
    pub fn from_request(request: BlobCopyRequest) -> Self {
        Self {
            batching: request.batching,
            created_time: None,
            end_watermark: None,
            completed: None,
        }
    }

    fn bound(&self) -> Option<WatermarkRange> {
        self.end_watermark
            .and_then(|end| WatermarkRange::new(FIRST_WATERMARK, end).ok())
    }
}

impl OperationCheckpoint for BlobCopyCheckpoint {
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
        range_percent_complete(self.completed, self.bound())
    }
}

pub struct BlobCopyOperation {
    index: Arc<dyn IndexDataStore>,
    blobs: Arc<dyn BlobMigrationStore>,
}

impl BlobCopyOperation {
    pub fn new(index: Arc<dyn IndexDataStore>, blobs: Arc<dyn BlobMigrationStore>) -> Self {
        Self { index, blobs }
    }
}

#[async_trait]
impl BatchOperation for BlobCopyOperation {
    type Checkpoint = BlobCopyCheckpoint;
    type Batch = WatermarkRange;
    type BatchResult = WatermarkRange;

    fn kind(&self) -> OperationKind {
        OperationKind::BlobCopy
    }

    async fn prepare(
        &self,
        operation_id: Uuid,
        mut checkpoint: BlobCopyCheckpoint,
    ) -> OrchestrationResult<BlobCopyCheckpoint> {
        if checkpoint.end_watermark.is_none() {
            checkpoint.end_watermark =
                self.index.max_watermark(&WatermarkFilter::All).await?;
            info!(
                operation_id = %operation_id,
                end_watermark = checkpoint.end_watermark,
                "Blob copy run prepared"
            );
        }
        Ok(checkpoint)
    }

    async fn acquire_batches(
        &self,
        _operation_id: Uuid,
        checkpoint: &BlobCopyCheckpoint,
    ) -> OrchestrationResult<Acquisition<WatermarkRange, BlobCopyCheckpoint>> {
        let source = RangeWindowedSource::descending(checkpoint.batching.size());
        let cursor = RangeCursor {
            bound: checkpoint.bound(),
            completed: checkpoint.completed,
        };
        let set = source
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
        self.blobs.copy_window(*batch).await?;
        Ok(*batch)
    }

    fn merge_progress(
        &self,
        mut checkpoint: BlobCopyCheckpoint,
        results: Vec<WatermarkRange>,
    ) -> OrchestrationResult<BlobCopyCheckpoint> {
        checkpoint.completed = Some(
            accumulate_completed(checkpoint.completed, results)
                .ok_or(OrchestrationError::NonContiguousProgress)?,
        );
        Ok(checkpoint)
    }

    async fn finalize(
        &self,
        operation_id: Uuid,
        checkpoint: &BlobCopyCheckpoint,
    ) -> OrchestrationResult<()> {
        info!(
            operation_id = %operation_id,
            copied = checkpoint.completed.map(|range| range.span()).unwrap_or(0),
            "Blob copy run completed"
        );
        Ok(())
    }
}
