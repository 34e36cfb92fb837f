//! # Operation Specialization Tests
//!
//! Exercises the range-windowed operations end to end against the in-memory
//! store: window shapes and walk direction, processor idempotence, the
//! attribute lifecycle, and finalize-exactly-once on an empty first cycle.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use uuid::Uuid;

use imagestore_ops::models::{
    AttributeDefinition, AttributeValueType, BatchingOptions, WatermarkRange,
};
use imagestore_ops::orchestration::operations::{
    AttributeDeleteCheckpoint, AttributeDeleteOperation, AttributeDeleteRequest,
    BlobCopyCheckpoint, BlobCopyOperation, BlobCopyRequest, CleanupCheckpoint,
    CleanupOperation, CleanupRequest, ReindexCheckpoint, ReindexOperation, ReindexRequest,
};
use imagestore_ops::orchestration::{
    Backoff, BatchOperation, LoopPolicies, OperationLoop, OrchestrationError, RetryPolicy,
};
use imagestore_ops::store::IndexDataStore;
use imagestore_ops::test_support::{InMemoryIndexStore, RecordingBlobStore};

fn range(start: i64, end: i64) -> WatermarkRange {
    WatermarkRange::new(start, end).unwrap()
}

fn batching(size: u64, max_parallel: usize) -> BatchingOptions {
    BatchingOptions::new(size, max_parallel).unwrap()
}

fn fast_policies() -> LoopPolicies {
    LoopPolicies {
        batch_retry: RetryPolicy::new(2, Backoff::None),
        finalize_retry: RetryPolicy::new(2, Backoff::None),
    }
}

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

#[tokio::test]
async fn reindex_first_cycle_yields_descending_windows() {
    let store = seeded_store(50);
    let operation = ReindexOperation::new(store);
    let operation_id = Uuid::new_v4();

    let checkpoint = operation
        .prepare(
            operation_id,
            ReindexCheckpoint::from_request(ReindexRequest {
                definitions: vec![AttributeDefinition::new(
                    "00100020",
                    AttributeValueType::String,
                )],
                batching: batching(5, 3),
            }),
        )
        .await
        .unwrap();
    assert_eq!(checkpoint.end_watermark, Some(50));

    let acquisition = operation
        .acquire_batches(operation_id, &checkpoint)
        .await
        .unwrap();
    let windows: Vec<WatermarkRange> =
        acquisition.batches.iter().map(|batch| batch.range).collect();
    assert_eq!(windows, vec![range(46, 50), range(41, 45), range(36, 40)]);

    // Merging the cycle pulls Completed.start down to 36.
    let results = windows.clone();
    let merged = operation
        .merge_progress(acquisition.checkpoint, results)
        .unwrap();
    assert_eq!(merged.completed, Some(range(36, 50)));
}

#[tokio::test]
async fn reindex_processor_is_idempotent() {
    let store = seeded_store(10);
    let operation = ReindexOperation::new(store.clone());
    let operation_id = Uuid::new_v4();

    let checkpoint = operation
        .prepare(
            operation_id,
            ReindexCheckpoint::from_request(ReindexRequest {
                definitions: vec![AttributeDefinition::new(
                    "00100020",
                    AttributeValueType::String,
                )],
                batching: batching(10, 1),
            }),
        )
        .await
        .unwrap();
    let acquisition = operation
        .acquire_batches(operation_id, &checkpoint)
        .await
        .unwrap();
    let batch = acquisition.batches[0].clone();

    operation.process_batch(operation_id, &batch).await.unwrap();
    let attribute_id = store.attribute("00100020").unwrap().attribute_id;
    let first = store.indexed_values(attribute_id);

    // Re-running the same descriptor yields the same store state.
    operation.process_batch(operation_id, &batch).await.unwrap();
    assert_eq!(store.indexed_values(attribute_id), first);
    assert_eq!(first.len(), 10);
}

#[tokio::test]
async fn reindex_skips_attributes_paused_by_a_concurrent_actor() {
    let store = seeded_store(10);
    let operation = ReindexOperation::new(store.clone());
    let operation_id = Uuid::new_v4();

    let checkpoint = operation
        .prepare(
            operation_id,
            ReindexCheckpoint::from_request(ReindexRequest {
                definitions: vec![
                    AttributeDefinition::new("00100020", AttributeValueType::String),
                    AttributeDefinition::new("00100030", AttributeValueType::Date),
                ],
                batching: batching(5, 2),
            }),
        )
        .await
        .unwrap();

    let paused_id = store.attribute("00100030").unwrap().attribute_id;
    store.pause_attribute(operation_id, paused_id);

    let acquisition = operation
        .acquire_batches(operation_id, &checkpoint)
        .await
        .unwrap();
    assert!(!acquisition.batches.is_empty());
    for batch in &acquisition.batches {
        assert_eq!(batch.attributes.len(), 1);
        assert_eq!(batch.attributes[0].path, "00100020");
    }

    // Pausing the whole set empties the batch set, which finalizes the run.
    let processing_id = store.attribute("00100020").unwrap().attribute_id;
    store.pause_attribute(operation_id, processing_id);
    let acquisition = operation
        .acquire_batches(operation_id, &checkpoint)
        .await
        .unwrap();
    assert!(acquisition.batches.is_empty());
}

#[tokio::test]
async fn attribute_delete_with_no_matching_data_finalizes_once() {
    // Scenario: the attribute exists but the store holds no instances, so
    // the first cycle's batch set is already empty.
    let store = Arc::new(InMemoryIndexStore::new());
    store
        .register_attributes(&[AttributeDefinition::new(
            "00100020",
            AttributeValueType::String,
        )])
        .await
        .unwrap();

    let engine = OperationLoop::new(
        Arc::new(AttributeDeleteOperation::new(store.clone())),
        fast_policies(),
    );
    let checkpoint = AttributeDeleteCheckpoint::from_request(AttributeDeleteRequest {
        path: "00100020".to_string(),
        value_type: AttributeValueType::String,
        batching: batching(5, 3),
    });

    engine
        .run_to_completion(Uuid::new_v4(), checkpoint)
        .await
        .unwrap();

    assert!(store.deleted_windows().is_empty());
    assert_eq!(store.delete_attribute_calls(), 1);
    assert!(store.attribute("00100020").is_none());
}

#[tokio::test]
async fn attribute_delete_removes_index_then_metadata() {
    let store = seeded_store(20);
    let attributes = store
        .register_attributes(&[AttributeDefinition::new(
            "00100020",
            AttributeValueType::String,
        )])
        .await
        .unwrap();
    let attribute_id = attributes[0].attribute_id;
    store
        .reindex_window(range(1, 20), &attributes)
        .await
        .unwrap();
    assert_eq!(store.indexed_values(attribute_id).len(), 20);

    let engine = OperationLoop::new(
        Arc::new(AttributeDeleteOperation::new(store.clone())),
        fast_policies(),
    );
    let checkpoint = AttributeDeleteCheckpoint::from_request(AttributeDeleteRequest {
        path: "00100020".to_string(),
        value_type: AttributeValueType::String,
        batching: batching(6, 2),
    });

    let done = engine
        .run_to_completion(Uuid::new_v4(), checkpoint)
        .await
        .unwrap();

    assert_eq!(done.completed, Some(range(1, 20)));
    assert!(store.indexed_values(attribute_id).is_empty());
    assert_eq!(store.delete_attribute_calls(), 1);
    assert!(store.attribute("00100020").is_none());
}

#[tokio::test]
async fn attribute_delete_of_unknown_attribute_fails_setup() {
    let store = Arc::new(InMemoryIndexStore::new());
    let operation = AttributeDeleteOperation::new(store);

    let error = operation
        .prepare(
            Uuid::new_v4(),
            AttributeDeleteCheckpoint::from_request(AttributeDeleteRequest {
                path: "00089999".to_string(),
                value_type: AttributeValueType::String,
                batching: batching(5, 1),
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, OrchestrationError::InvalidInput(_)));
}

#[tokio::test]
async fn cleanup_walks_ascending_and_converges_on_rerun() {
    let store = Arc::new(InMemoryIndexStore::new());
    let old = Utc::now() - ChronoDuration::days(30);
    for watermark in 1..=12 {
        store.add_instance(
            watermark,
            format!("instance-{watermark}"),
            json!({}),
            old,
        );
        store.add_fragment(watermark, format!("offsets-{watermark}"));
    }

    let engine = OperationLoop::new(
        Arc::new(CleanupOperation::new(store.clone())),
        fast_policies(),
    );
    let checkpoint = CleanupCheckpoint::from_request(CleanupRequest {
        stale_before: Utc::now() - ChronoDuration::days(7),
        batching: batching(5, 2),
    });

    let done = engine
        .run_to_completion(Uuid::new_v4(), checkpoint)
        .await
        .unwrap();

    // Oldest watermarks first: the run's windows tile [1, 12] from below.
    let mut windows = store.cleaned_windows();
    windows.sort_by_key(WatermarkRange::start);
    assert_eq!(windows, vec![range(1, 5), range(6, 10), range(11, 12)]);
    assert_eq!(done.completed, Some(range(1, 12)));
    assert_eq!(store.fragment_count(), 0);
    assert_eq!(store.frame_index_count(), 12);

    // Repeating a window converges: nothing left to migrate.
    let cleaned = store
        .cleanup_window(range(1, 5), Utc::now())
        .await
        .unwrap();
    assert_eq!(cleaned, 0);
    assert_eq!(store.frame_index_count(), 12);
}

#[tokio::test]
async fn cleanup_leaves_fresh_instances_alone() {
    let store = Arc::new(InMemoryIndexStore::new());
    let old = Utc::now() - ChronoDuration::days(30);
    store.add_instance(1, "old", json!({}), old);
    store.add_fragment(1, "offsets-1");
    store.add_instance(2, "fresh", json!({}), Utc::now());
    store.add_fragment(2, "offsets-2");

    let engine = OperationLoop::new(
        Arc::new(CleanupOperation::new(store.clone())),
        fast_policies(),
    );
    let checkpoint = CleanupCheckpoint::from_request(CleanupRequest {
        stale_before: Utc::now() - ChronoDuration::days(7),
        batching: batching(5, 2),
    });

    engine
        .run_to_completion(Uuid::new_v4(), checkpoint)
        .await
        .unwrap();

    assert_eq!(store.fragment_count(), 1);
    assert_eq!(store.frame_index_count(), 1);
}

#[tokio::test]
async fn blob_copy_covers_the_range_in_bounded_windows() {
    let store = seeded_store(17);
    let blobs = Arc::new(RecordingBlobStore::new());
    let engine = OperationLoop::new(
        Arc::new(BlobCopyOperation::new(store, blobs.clone())),
        fast_policies(),
    );

    let done = engine
        .run_to_completion(
            Uuid::new_v4(),
            BlobCopyCheckpoint::from_request(BlobCopyRequest {
                batching: batching(4, 2),
            }),
        )
        .await
        .unwrap();

    assert_eq!(done.completed, Some(range(1, 17)));
    let windows = blobs.copied_windows();
    assert_eq!(windows.len(), 5);
    assert!(windows.iter().all(|window| window.span() <= 4));
    let total: u64 = windows.iter().map(|window| window.span()).sum();
    assert_eq!(total, 17);
}
