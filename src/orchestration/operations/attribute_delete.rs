//! # Attribute Delete Operation
//!
//! Retires a searchable attribute: deletes its derived index rows window by
//! window, then removes the attribute's metadata row in the finalize
//! activity, only once the windows are exhausted. Deleting an
//! already-absent index row is a no-op, so windows can be re-dispatched
//! freely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    accumulate_completed, AttributeValueType, BatchingOptions, OperationKind, WatermarkRange,
    FIRST_WATERMARK,
};
use crate::orchestration::batch_source::{BatchSource, RangeCursor, RangeWindowedSource};
use crate::orchestration::checkpoint::{range_percent_complete, OperationCheckpoint};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::operation::{Acquisition, BatchOperation};
use crate::store::{IndexDataStore, WatermarkFilter};

/// Caller-supplied parameters of an attribute-delete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDeleteRequest {
    pub path: String,
    pub value_type: AttributeValueType,
    pub batching: BatchingOptions,
}

/// Self-describing unit of deletion work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDeleteBatch {
    pub range: WatermarkRange,
    pub path: String,
    pub value_type: AttributeValueType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDeleteCheckpoint {
    pub batching: BatchingOptions,
    pub created_time: Option<DateTime<Utc>>,
    pub path: String,
    pub value_type: AttributeValueType,
    pub end_watermark: Option<i64>,
    pub completed: Option<WatermarkRange>,
    /// Set once the attribute row has been flipped to `Deleting`.
    pub marked_deleting: bool,
}

impl AttributeDeleteCheckpoint {
    pub fn from_request(request: AttributeDeleteRequest) -> Self {
        Self {
            batching: request.batching,
            created_time: None,
            path: request.path,
            value_type: request.value_type,
            end_watermark: None,
            completed: None,
            marked_deleting: false,
        }
    }

    fn bound(&self) -> Option<WatermarkRange> {
        self.end_watermark
            .and_then(|end| WatermarkRange::new(FIRST_WATERMARK, end).ok())
    }
}

impl OperationCheckpoint for AttributeDeleteCheckpoint {
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

    fn resources(&self) -> Vec<String> {
        vec![format!("attributes/{}", self.path)]
    }
}

pub struct AttributeDeleteOperation {
    store: Arc<dyn IndexDataStore>,
}

impl AttributeDeleteOperation {
    pub fn new(store: Arc<dyn IndexDataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BatchOperation for AttributeDeleteOperation {
    type Checkpoint = AttributeDeleteCheckpoint;
    type Batch = AttributeDeleteBatch;
    type BatchResult = WatermarkRange;

    fn kind(&self) -> OperationKind {
        OperationKind::AttributeDelete
    }

    async fn prepare(
        &self,
        operation_id: Uuid,
        mut checkpoint: AttributeDeleteCheckpoint,
    ) -> OrchestrationResult<AttributeDeleteCheckpoint> {
        if !checkpoint.marked_deleting {
            let attribute = self
                .store
                .find_attribute(&checkpoint.path, checkpoint.value_type)
                .await?;
            if attribute.is_none() {
                return Err(OrchestrationError::InvalidInput(format!(
                    "attribute {} ({}) is not registered",
                    checkpoint.path, checkpoint.value_type
                )));
            }
            self.store
                .mark_attribute_deleting(&checkpoint.path, checkpoint.value_type)
                .await?;
            checkpoint.marked_deleting = true;
        }

        if checkpoint.end_watermark.is_none() {
            checkpoint.end_watermark =
                self.store.max_watermark(&WatermarkFilter::All).await?;
            info!(
                operation_id = %operation_id,
                path = %checkpoint.path,
                end_watermark = checkpoint.end_watermark,
                "Attribute delete run prepared"
            );
        }
        Ok(checkpoint)
    }

    async fn acquire_batches(
        &self,
        _operation_id: Uuid,
        checkpoint: &AttributeDeleteCheckpoint,
    ) -> OrchestrationResult<Acquisition<AttributeDeleteBatch, AttributeDeleteCheckpoint>> {
        let source = RangeWindowedSource::descending(checkpoint.batching.size());
        let cursor = RangeCursor {
            bound: checkpoint.bound(),
            completed: checkpoint.completed,
        };
        let set = source
            .next_batches(&cursor, checkpoint.batching.max_parallel_count())
            .await?;
        let batches = set
            .batches
            .into_iter()
            .map(|range| AttributeDeleteBatch {
                range,
                path: checkpoint.path.clone(),
                value_type: checkpoint.value_type,
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
        batch: &AttributeDeleteBatch,
    ) -> OrchestrationResult<WatermarkRange> {
        self.store
            .delete_attribute_index_window(&batch.path, batch.value_type, batch.range)
            .await?;
        Ok(batch.range)
    }

    fn merge_progress(
        &self,
        mut checkpoint: AttributeDeleteCheckpoint,
        results: Vec<WatermarkRange>,
    ) -> OrchestrationResult<AttributeDeleteCheckpoint> {
        checkpoint.completed = Some(
            accumulate_completed(checkpoint.completed, results)
                .ok_or(OrchestrationError::NonContiguousProgress)?,
        );
        Ok(checkpoint)
    }

    async fn finalize(
        &self,
        operation_id: Uuid,
        checkpoint: &AttributeDeleteCheckpoint,
    ) -> OrchestrationResult<()> {
        // The metadata row goes last: index rows for the attribute are gone
        // once the windows are exhausted.
        self.store
            .delete_attribute(&checkpoint.path, checkpoint.value_type)
            .await?;
        info!(
            operation_id = %operation_id,
            path = %checkpoint.path,
            "Attribute deleted"
        );
        Ok(())
    }
}
