//! # Export Operation
//!
//! Bulk export of stored objects to external storage, driven by the
//! queue-dequeue batching strategy over a resumable export source. A failed
//! source read of one item is data, not a fault: it becomes a structured
//! record in the side error log and a `failed` count, so an otherwise
//! successful batch is never aborted. Finalize flushes the buffered error
//! log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{BatchingOptions, OperationKind};
use crate::orchestration::batch_source::{BatchSource, QueueCursor, QueueDequeueSource};
use crate::orchestration::checkpoint::OperationCheckpoint;
use crate::orchestration::errors::OrchestrationResult;
use crate::orchestration::operation::{Acquisition, BatchOperation};
use crate::store::{
    ExportCopyOutcome, ExportErrorRecord, ExportItem, ExportSink, ExportSource,
};

/// Caller-supplied parameters of an export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub batching: BatchingOptions,
}

/// Self-describing unit of export work: the dequeued item set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBatch {
    pub items: Vec<ExportItem>,
}

/// `(succeeded, failed)` progress counters, merged per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub exported: u64,
    pub failed: u64,
}

impl ExportProgress {
    pub fn add(&mut self, other: ExportProgress) {
        self.exported += other.exported;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportCheckpoint {
    pub batching: BatchingOptions,
    pub created_time: Option<DateTime<Utc>>,
    /// The enumerator's continuation description; `None` once it reports
    /// conceptually done (or before the run has started).
    pub description: Option<serde_json::Value>,
    /// Distinguishes "not yet started" from "enumerator done".
    pub started: bool,
    pub progress: ExportProgress,
}

impl ExportCheckpoint {
    pub fn from_request(request: ExportRequest) -> Self {
        Self {
            batching: request.batching,
            created_time: None,
            description: None,
            started: false,
            progress: ExportProgress::default(),
        }
    }
}

impl OperationCheckpoint for ExportCheckpoint {
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
        // The enumerator's size is opaque, so there is no denominator; the
        // projection reports 100 once the run completes.
        None
    }
}

pub struct ExportOperation {
    source: Arc<dyn ExportSource>,
    sink: Arc<dyn ExportSink>,
}

impl ExportOperation {
    pub fn new(source: Arc<dyn ExportSource>, sink: Arc<dyn ExportSink>) -> Self {
        Self { source, sink }
    }
}

#[async_trait]
impl BatchOperation for ExportOperation {
    type Checkpoint = ExportCheckpoint;
    type Batch = ExportBatch;
    type BatchResult = ExportProgress;

    fn kind(&self) -> OperationKind {
        OperationKind::Export
    }

    async fn prepare(
        &self,
        operation_id: Uuid,
        mut checkpoint: ExportCheckpoint,
    ) -> OrchestrationResult<ExportCheckpoint> {
        if !checkpoint.started {
            checkpoint.description = self.source.initial_description();
            checkpoint.started = true;
            info!(
                operation_id = %operation_id,
                has_items = checkpoint.description.is_some(),
                "Export run prepared"
            );
        }
        Ok(checkpoint)
    }

    async fn acquire_batches(
        &self,
        _operation_id: Uuid,
        checkpoint: &ExportCheckpoint,
    ) -> OrchestrationResult<Acquisition<ExportBatch, ExportCheckpoint>> {
        let source = QueueDequeueSource::new(
            Arc::clone(&self.source),
            checkpoint.batching.size() as usize,
        );
        let cursor = QueueCursor {
            description: checkpoint.description.clone(),
        };
        let set = source
            .next_batches(&cursor, checkpoint.batching.max_parallel_count())
            .await?;

        let mut advanced = checkpoint.clone();
        advanced.description = set.next_cursor.description;

        Ok(Acquisition {
            batches: set
                .batches
                .into_iter()
                .map(|items| ExportBatch { items })
                .collect(),
            checkpoint: advanced,
        })
    }

    async fn process_batch(
        &self,
        operation_id: Uuid,
        batch: &ExportBatch,
    ) -> OrchestrationResult<ExportProgress> {
        let mut progress = ExportProgress::default();
        for item in &batch.items {
            match self.sink.copy(item).await? {
                ExportCopyOutcome::Copied => progress.exported += 1,
                ExportCopyOutcome::Failed { reason } => {
                    warn!(
                        operation_id = %operation_id,
                        identifier = %item.identifier,
                        reason = %reason,
                        "Export item failed, recording error"
                    );
                    self.sink
                        .write_error(ExportErrorRecord {
                            identifier: item.identifier.clone(),
                            reason,
                            occurred_at: Utc::now(),
                        })
                        .await?;
                    progress.failed += 1;
                }
            }
        }
        Ok(progress)
    }

    fn merge_progress(
        &self,
        mut checkpoint: ExportCheckpoint,
        results: Vec<ExportProgress>,
    ) -> OrchestrationResult<ExportCheckpoint> {
        for result in results {
            checkpoint.progress.add(result);
        }
        Ok(checkpoint)
    }

    async fn finalize(
        &self,
        operation_id: Uuid,
        checkpoint: &ExportCheckpoint,
    ) -> OrchestrationResult<()> {
        self.sink.flush_errors().await?;
        info!(
            operation_id = %operation_id,
            exported = checkpoint.progress.exported,
            failed = checkpoint.progress.failed,
            "Export run completed"
        );
        Ok(())
    }
}
