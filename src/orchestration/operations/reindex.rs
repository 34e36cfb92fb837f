//! # Reindex Operation
//!
//! Backfills index rows for newly defined searchable attributes across every
//! previously stored instance, walking the watermark axis descending so the
//! newest data becomes queryable first.
//!
//! Two one-time setup activities run before the first cycle: the attribute
//! definitions are registered (re-registration returns the existing rows)
//! and per-attribute progress rows are created with status `Processing`.
//! Every cycle then re-reads the set of attributes still `Processing` for
//! this operation id. A concurrent actor pausing or completing an attribute
//! shrinks the set without any in-process coordination, and an empty set
//! finalizes the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    accumulate_completed, AttributeDefinition, BatchingOptions, OperationKind,
    SearchableAttribute, WatermarkRange, FIRST_WATERMARK,
};
use crate::orchestration::batch_source::{BatchSource, RangeCursor, RangeWindowedSource};
use crate::orchestration::checkpoint::{range_percent_complete, OperationCheckpoint};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::operation::{Acquisition, BatchOperation};
use crate::store::{IndexDataStore, WatermarkFilter};

/// Caller-supplied parameters of a reindex run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexRequest {
    pub definitions: Vec<AttributeDefinition>,
    pub batching: BatchingOptions,
}

/// Self-describing unit of reindex work: one watermark window plus the
/// attribute set to index, so a retried invocation needs no orchestration
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexBatch {
    pub range: WatermarkRange,
    pub attributes: Vec<SearchableAttribute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexCheckpoint {
    pub batching: BatchingOptions,
    pub created_time: Option<DateTime<Utc>>,
    /// Fixed upper bound, snapshotted once so instances stored during the
    /// run do not extend its scope. `None` before `prepare`, and also when
    /// the store held no instances at all.
    pub end_watermark: Option<i64>,
    pub completed: Option<WatermarkRange>,
    /// Definitions carried until registration has happened.
    pub definitions: Vec<AttributeDefinition>,
    /// Ids of the attributes this run covers; empty until registered.
    pub attribute_ids: Vec<i64>,
    pub attribute_paths: Vec<String>,
}

impl ReindexCheckpoint {
    pub fn from_request(request: ReindexRequest) -> Self {
        Self {
            batching: request.batching,
            created_time: None,
            end_watermark: None,
            completed: None,
            definitions: request.definitions,
            attribute_ids: Vec::new(),
            attribute_paths: Vec::new(),
        }
    }

    fn bound(&self) -> Option<WatermarkRange> {
        self.end_watermark
            .and_then(|end| WatermarkRange::new(FIRST_WATERMARK, end).ok())
    }
}

impl OperationCheckpoint for ReindexCheckpoint {
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
        self.attribute_paths
            .iter()
            .map(|path| format!("attributes/{path}"))
            .collect()
    }
}

pub struct ReindexOperation {
    store: Arc<dyn IndexDataStore>,
}

impl ReindexOperation {
    pub fn new(store: Arc<dyn IndexDataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BatchOperation for ReindexOperation {
    type Checkpoint = ReindexCheckpoint;
    type Batch = ReindexBatch;
    type BatchResult = WatermarkRange;

    fn kind(&self) -> OperationKind {
        OperationKind::Reindex
    }

    async fn prepare(
        &self,
        operation_id: Uuid,
        mut checkpoint: ReindexCheckpoint,
    ) -> OrchestrationResult<ReindexCheckpoint> {
        // Both setup activities are guarded so a re-driven run with a
        // persisted checkpoint does not re-snapshot the bound or reassign
        // the attribute set.
        if checkpoint.attribute_ids.is_empty() {
            if checkpoint.definitions.is_empty() {
                return Err(OrchestrationError::InvalidInput(
                    "reindex requires at least one attribute definition".into(),
                ));
            }
            let attributes = self
                .store
                .register_attributes(&checkpoint.definitions)
                .await?;
            let ids: Vec<i64> = attributes.iter().map(|a| a.attribute_id).collect();
            self.store
                .assign_reindex_operation(operation_id, &ids)
                .await?;
            checkpoint.attribute_paths =
                attributes.iter().map(|a| a.path.clone()).collect();
            checkpoint.attribute_ids = ids;
        }

        if checkpoint.end_watermark.is_none() {
            checkpoint.end_watermark =
                self.store.max_watermark(&WatermarkFilter::All).await?;
            info!(
                operation_id = %operation_id,
                end_watermark = checkpoint.end_watermark,
                attributes = checkpoint.attribute_ids.len(),
                "Reindex run prepared"
            );
        }

        Ok(checkpoint)
    }

    async fn acquire_batches(
        &self,
        operation_id: Uuid,
        checkpoint: &ReindexCheckpoint,
    ) -> OrchestrationResult<Acquisition<ReindexBatch, ReindexCheckpoint>> {
        // Only attributes still Processing for this run; the set can shrink
        // between cycles under concurrent pause/complete.
        let attributes = self.store.attributes_processing(operation_id).await?;
        if attributes.is_empty() {
            return Ok(Acquisition {
                batches: Vec::new(),
                checkpoint: checkpoint.clone(),
            });
        }

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
            .map(|range| ReindexBatch {
                range,
                attributes: attributes.clone(),
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
        batch: &ReindexBatch,
    ) -> OrchestrationResult<WatermarkRange> {
        self.store
            .reindex_window(batch.range, &batch.attributes)
            .await?;
        Ok(batch.range)
    }

    fn merge_progress(
        &self,
        mut checkpoint: ReindexCheckpoint,
        results: Vec<WatermarkRange>,
    ) -> OrchestrationResult<ReindexCheckpoint> {
        checkpoint.completed = Some(
            accumulate_completed(checkpoint.completed, results)
                .ok_or(OrchestrationError::NonContiguousProgress)?,
        );
        Ok(checkpoint)
    }

    async fn finalize(
        &self,
        operation_id: Uuid,
        _checkpoint: &ReindexCheckpoint,
    ) -> OrchestrationResult<()> {
        self.store.complete_reindex(operation_id).await?;
        info!(operation_id = %operation_id, "Reindex run completed");
        Ok(())
    }
}
