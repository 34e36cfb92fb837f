//! # Operation Runtime Integration Tests
//!
//! Drives complete reindex runs through the operation runtime and asserts on
//! the engine-level guarantees: terminal status recording, one-time
//! `created_time` capture, retry transparency, failure without partial
//! checkpoints, cancellation, and the status projection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use imagestore_ops::models::{
    AttributeDefinition, AttributeValueType, BatchingOptions, OperationKind, OperationStatus,
};
use imagestore_ops::orchestration::operations::{
    ReindexCheckpoint, ReindexOperation, ReindexRequest,
};
use imagestore_ops::orchestration::{
    Backoff, BaseUrlResolver, LoopPolicies, OperationLoop, OperationRuntime, RetryPolicy,
    RuntimeStatus, StatusProjector,
};
use imagestore_ops::test_support::InMemoryIndexStore;

fn seeded_store(instances: i64) -> Arc<InMemoryIndexStore> {
    let store = Arc::new(InMemoryIndexStore::new());
    for watermark in 1..=instances {
        store.add_instance(
            watermark,
            format!("instance-{watermark}"),
            json!({ "00100020": format!("PID-{watermark}") }),
            Utc::now(),
        );
    }
    store
}

fn reindex_checkpoint(size: u64, max_parallel: usize) -> ReindexCheckpoint {
    ReindexCheckpoint::from_request(ReindexRequest {
        definitions: vec![AttributeDefinition::new(
            "00100020",
            AttributeValueType::String,
        )],
        batching: BatchingOptions::new(size, max_parallel).unwrap(),
    })
}

fn fast_policies() -> LoopPolicies {
    LoopPolicies {
        batch_retry: RetryPolicy::new(3, Backoff::None),
        finalize_retry: RetryPolicy::new(3, Backoff::None),
    }
}

#[tokio::test]
async fn reindex_run_completes_and_projects_status() {
    let store = seeded_store(50);
    let runtime = Arc::new(OperationRuntime::new());
    let engine = OperationLoop::new(
        Arc::new(ReindexOperation::new(store.clone())),
        fast_policies(),
    );

    let operation_id = runtime.register(OperationKind::Reindex);
    let status = runtime
        .drive(operation_id, &engine, reindex_checkpoint(5, 3))
        .await
        .unwrap();
    assert_eq!(status, RuntimeStatus::Completed);

    // Every instance indexed, exactly ceil(50 / 5) windows dispatched.
    let attribute = store.attribute("00100020").unwrap();
    assert_eq!(store.indexed_values(attribute.attribute_id).len(), 50);
    assert_eq!(store.reindexed_windows().len(), 10);
    assert_eq!(store.complete_reindex_calls(), 1);

    let projector = StatusProjector::new(
        runtime.clone(),
        Arc::new(BaseUrlResolver::new("https://imaging.example.com/v1")),
    );
    let state = projector.get_state(operation_id).unwrap();
    assert_eq!(state.status, OperationStatus::Completed);
    assert_eq!(state.percent_complete, Some(100));
    assert_eq!(
        state.resources,
        vec!["https://imaging.example.com/v1/attributes/00100020".to_string()]
    );
}

#[tokio::test]
async fn created_time_is_captured_from_the_instance_record() {
    let store = seeded_store(10);
    let runtime = Arc::new(OperationRuntime::new());
    let engine = OperationLoop::new(
        Arc::new(ReindexOperation::new(store)),
        fast_policies(),
    );

    let operation_id = runtime.register(OperationKind::Reindex);
    let registered_at = runtime.get_instance(operation_id).unwrap().created_time;

    runtime
        .drive(operation_id, &engine, reindex_checkpoint(5, 2))
        .await
        .unwrap();

    let checkpoint: ReindexCheckpoint =
        serde_json::from_value(runtime.get_instance(operation_id).unwrap().checkpoint).unwrap();
    assert_eq!(checkpoint.created_time, Some(registered_at));
}

#[tokio::test]
async fn transient_store_failure_is_invisible_within_retry_budget() {
    let store = seeded_store(20);
    store
        .fail_reindex_times
        .store(2, std::sync::atomic::Ordering::SeqCst);
    let runtime = Arc::new(OperationRuntime::new());
    let engine = OperationLoop::new(
        Arc::new(ReindexOperation::new(store.clone())),
        fast_policies(),
    );

    let operation_id = runtime.register(OperationKind::Reindex);
    let status = runtime
        .drive(operation_id, &engine, reindex_checkpoint(5, 2))
        .await
        .unwrap();

    assert_eq!(status, RuntimeStatus::Completed);
    let attribute = store.attribute("00100020").unwrap();
    assert_eq!(store.indexed_values(attribute.attribute_id).len(), 20);
}

#[tokio::test]
async fn retry_exhaustion_fails_the_run_without_partial_progress() {
    let store = seeded_store(20);
    store
        .fail_reindex_times
        .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);
    let runtime = Arc::new(OperationRuntime::new());
    let engine = OperationLoop::new(
        Arc::new(ReindexOperation::new(store.clone())),
        fast_policies(),
    );

    let operation_id = runtime.register(OperationKind::Reindex);
    let error = runtime
        .drive(operation_id, &engine, reindex_checkpoint(5, 2))
        .await
        .unwrap_err();
    assert!(error.to_string().contains("failed after 3 attempts"));

    let instance = runtime.get_instance(operation_id).unwrap();
    assert_eq!(instance.status, RuntimeStatus::Failed);
    // The failing cycle persisted nothing: the checkpoint still shows no
    // completed range, and finalize never ran.
    let checkpoint: ReindexCheckpoint = serde_json::from_value(instance.checkpoint).unwrap();
    assert_eq!(checkpoint.completed, None);
    assert_eq!(store.complete_reindex_calls(), 0);
}

#[tokio::test]
async fn canceled_run_schedules_no_further_cycles() {
    let store = seeded_store(50);
    let runtime = Arc::new(OperationRuntime::new());
    let engine = OperationLoop::new(
        Arc::new(ReindexOperation::new(store.clone())),
        fast_policies(),
    );

    let operation_id = runtime.register(OperationKind::Reindex);
    runtime.cancel(operation_id).unwrap();

    let status = runtime
        .drive(operation_id, &engine, reindex_checkpoint(5, 3))
        .await
        .unwrap();
    assert_eq!(status, RuntimeStatus::Canceled);
    assert!(store.reindexed_windows().is_empty());
    assert_eq!(store.complete_reindex_calls(), 0);

    let projector = StatusProjector::new(
        runtime,
        Arc::new(BaseUrlResolver::new("https://imaging.example.com")),
    );
    assert_eq!(
        projector.get_state(operation_id).unwrap().status,
        OperationStatus::Canceled
    );
}

#[tokio::test]
async fn spawned_run_reaches_terminal_status_in_background() {
    let store = seeded_store(30);
    let runtime = Arc::new(OperationRuntime::new());

    let operation_id = runtime.spawn(
        Arc::new(ReindexOperation::new(store)),
        fast_policies(),
        reindex_checkpoint(5, 2),
    );

    let mut status = RuntimeStatus::Pending;
    for _ in 0..200 {
        status = runtime.get_instance(operation_id).unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, RuntimeStatus::Completed);
}
