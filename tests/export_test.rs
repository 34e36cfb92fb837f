//! # Export Operation Tests
//!
//! Queue-dequeue strategy end to end: dequeue-until-empty cycles, the
//! exhausted-description finalize path, data-level failures reported as
//! counts and error records, and finalize failure after successful batches.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use imagestore_ops::models::BatchingOptions;
use imagestore_ops::orchestration::operations::{
    ExportCheckpoint, ExportOperation, ExportRequest,
};
use imagestore_ops::orchestration::{
    Backoff, BatchOperation, CycleOutcome, LoopPolicies, OperationLoop, OrchestrationError,
    RetryPolicy,
};
use imagestore_ops::store::{
    ExportCopyOutcome, ExportErrorRecord, ExportItem, ExportSink, IdentifierListSource,
    StoreError, StoreResult,
};
use imagestore_ops::test_support::RecordingExportSink;

fn batching(size: u64, max_parallel: usize) -> BatchingOptions {
    BatchingOptions::new(size, max_parallel).unwrap()
}

fn fast_policies() -> LoopPolicies {
    LoopPolicies {
        batch_retry: RetryPolicy::new(2, Backoff::None),
        finalize_retry: RetryPolicy::new(2, Backoff::None),
    }
}

fn identifiers(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("study-{i}")).collect()
}

#[tokio::test]
async fn export_copies_every_item_and_flushes_once() {
    let source = Arc::new(IdentifierListSource::new(identifiers(7)));
    let sink = Arc::new(RecordingExportSink::new());
    let engine = OperationLoop::new(
        Arc::new(ExportOperation::new(source, sink.clone())),
        fast_policies(),
    );

    let done = engine
        .run_to_completion(
            Uuid::new_v4(),
            ExportCheckpoint::from_request(ExportRequest {
                batching: batching(2, 2),
            }),
        )
        .await
        .unwrap();

    assert_eq!(done.progress.exported, 7);
    assert_eq!(done.progress.failed, 0);
    assert_eq!(sink.copied().len(), 7);
    assert_eq!(sink.flush_calls(), 1);
}

#[tokio::test]
async fn exhausted_description_finalizes_instead_of_continuing() {
    // Four items, batch size 2, up to 3 dequeues per cycle: the first cycle
    // drains the enumerator in two dequeues and the third finds nothing, so
    // the continuation description is gone on the next check.
    let source = Arc::new(IdentifierListSource::new(identifiers(4)));
    let sink = Arc::new(RecordingExportSink::new());
    let operation = Arc::new(ExportOperation::new(source, sink.clone()));
    let engine = OperationLoop::new(operation.clone(), fast_policies());
    let operation_id = Uuid::new_v4();

    let checkpoint = operation
        .prepare(
            operation_id,
            ExportCheckpoint::from_request(ExportRequest {
                batching: batching(2, 3),
            }),
        )
        .await
        .unwrap();

    let first = engine.run_cycle(operation_id, &checkpoint).await.unwrap();
    let checkpoint = match first {
        CycleOutcome::Continue(next) => next,
        CycleOutcome::Finalized(_) => panic!("first cycle should continue"),
    };
    assert_eq!(checkpoint.progress.exported, 4);
    assert!(checkpoint.description.is_none());
    assert_eq!(sink.flush_calls(), 0);

    let second = engine.run_cycle(operation_id, &checkpoint).await.unwrap();
    assert!(matches!(second, CycleOutcome::Finalized(_)));
    assert_eq!(sink.flush_calls(), 1);
}

#[tokio::test]
async fn empty_source_finalizes_without_dequeuing() {
    let source = Arc::new(IdentifierListSource::new(Vec::new()));
    let sink = Arc::new(RecordingExportSink::new());
    let engine = OperationLoop::new(
        Arc::new(ExportOperation::new(source, sink.clone())),
        fast_policies(),
    );

    let done = engine
        .run_to_completion(
            Uuid::new_v4(),
            ExportCheckpoint::from_request(ExportRequest {
                batching: batching(2, 2),
            }),
        )
        .await
        .unwrap();

    assert_eq!(done.progress.exported, 0);
    assert!(sink.copied().is_empty());
    assert_eq!(sink.flush_calls(), 1);
}

#[tokio::test]
async fn failed_reads_are_counted_and_logged_not_thrown() {
    let source = Arc::new(IdentifierListSource::new(identifiers(5)));
    let sink = Arc::new(RecordingExportSink::failing_on(vec![
        "study-2".to_string(),
        "study-4".to_string(),
    ]));
    let engine = OperationLoop::new(
        Arc::new(ExportOperation::new(source, sink.clone())),
        fast_policies(),
    );

    let done = engine
        .run_to_completion(
            Uuid::new_v4(),
            ExportCheckpoint::from_request(ExportRequest {
                batching: batching(2, 2),
            }),
        )
        .await
        .unwrap();

    assert_eq!(done.progress.exported, 3);
    assert_eq!(done.progress.failed, 2);

    let errors = sink.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|record| record.identifier == "study-2"));
    assert!(errors.iter().any(|record| record.identifier == "study-4"));
}

/// Sink whose error-log flush always fails.
struct FlushFailingSink {
    inner: RecordingExportSink,
}

#[async_trait]
impl ExportSink for FlushFailingSink {
    async fn copy(&self, item: &ExportItem) -> StoreResult<ExportCopyOutcome> {
        self.inner.copy(item).await
    }

    async fn write_error(&self, record: ExportErrorRecord) -> StoreResult<()> {
        self.inner.write_error(record).await
    }

    async fn flush_errors(&self) -> StoreResult<()> {
        Err(StoreError::Contract("error log unavailable".into()))
    }
}

#[tokio::test]
async fn finalize_failure_fails_the_run_after_successful_batches() {
    let source = Arc::new(IdentifierListSource::new(identifiers(3)));
    let sink = Arc::new(FlushFailingSink {
        inner: RecordingExportSink::new(),
    });
    let engine = OperationLoop::new(
        Arc::new(ExportOperation::new(source, sink.clone())),
        fast_policies(),
    );

    let error = engine
        .run_to_completion(
            Uuid::new_v4(),
            ExportCheckpoint::from_request(ExportRequest {
                batching: batching(2, 2),
            }),
        )
        .await
        .unwrap_err();

    // All items were exported, but the run is not done until finalize is.
    assert_eq!(sink.inner.copied().len(), 3);
    match error {
        OrchestrationError::RetriesExhausted { activity, .. } => {
            assert_eq!(activity, "finalize")
        }
        other => panic!("unexpected error: {other}"),
    }
}
