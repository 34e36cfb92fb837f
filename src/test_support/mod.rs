//! # Test Support
//!
//! In-memory implementations of the store collaborators, shared by unit and
//! integration tests. They honor the same idempotence contracts as the
//! production stores (equal index values converge, deleting absent rows is a
//! no-op) and record enough call history to assert on engine behavior,
//! including injectable transient failures for retry coverage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use crate::models::{
    AttributeDefinition, AttributeOperation, AttributeOperationStatus, AttributeStatus,
    AttributeValueType, SearchableAttribute, WatermarkRange,
};
use crate::store::{
    BlobMigrationStore, ExportCopyOutcome, ExportErrorRecord, ExportItem, ExportSink,
    IndexDataStore, StoreError, StoreResult, WatermarkFilter,
};

/// One stored instance row.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub identifier: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct IndexState {
    instances: BTreeMap<i64, InstanceRecord>,
    attributes: Vec<SearchableAttribute>,
    operations: Vec<AttributeOperation>,
    /// `(attribute_id, watermark) -> indexed value`.
    index: BTreeMap<(i64, i64), String>,
    /// Stale derived rows: `watermark -> payload`.
    fragments: BTreeMap<i64, String>,
    frame_index: BTreeMap<i64, String>,
    next_attribute_id: i64,
    reindexed_windows: Vec<WatermarkRange>,
    deleted_windows: Vec<WatermarkRange>,
    cleaned_windows: Vec<WatermarkRange>,
    complete_reindex_calls: u32,
    delete_attribute_calls: u32,
}

/// In-memory [`IndexDataStore`].
#[derive(Debug, Default)]
pub struct InMemoryIndexStore {
    state: Mutex<IndexState>,
    /// Number of upcoming `reindex_window` calls that fail transiently.
    pub fail_reindex_times: AtomicU32,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(
        &self,
        watermark: i64,
        identifier: impl Into<String>,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) {
        self.state.lock().instances.insert(
            watermark,
            InstanceRecord {
                identifier: identifier.into(),
                metadata,
                created_at,
            },
        );
    }

    pub fn add_fragment(&self, watermark: i64, payload: impl Into<String>) {
        self.state.lock().fragments.insert(watermark, payload.into());
    }

    /// Simulate a concurrent actor pausing an attribute mid-run.
    pub fn pause_attribute(&self, operation_id: Uuid, attribute_id: i64) {
        let mut state = self.state.lock();
        for operation in &mut state.operations {
            if operation.operation_id == operation_id && operation.attribute_id == attribute_id
            {
                operation.status = AttributeOperationStatus::Paused;
            }
        }
    }

    pub fn indexed_values(&self, attribute_id: i64) -> BTreeMap<i64, String> {
        self.state
            .lock()
            .index
            .iter()
            .filter(|((id, _), _)| *id == attribute_id)
            .map(|((_, watermark), value)| (*watermark, value.clone()))
            .collect()
    }

    pub fn attribute(&self, path: &str) -> Option<SearchableAttribute> {
        self.state
            .lock()
            .attributes
            .iter()
            .find(|a| a.path == path)
            .cloned()
    }

    pub fn fragment_count(&self) -> usize {
        self.state.lock().fragments.len()
    }

    pub fn frame_index_count(&self) -> usize {
        self.state.lock().frame_index.len()
    }

    pub fn reindexed_windows(&self) -> Vec<WatermarkRange> {
        self.state.lock().reindexed_windows.clone()
    }

    pub fn deleted_windows(&self) -> Vec<WatermarkRange> {
        self.state.lock().deleted_windows.clone()
    }

    pub fn cleaned_windows(&self) -> Vec<WatermarkRange> {
        self.state.lock().cleaned_windows.clone()
    }

    pub fn complete_reindex_calls(&self) -> u32 {
        self.state.lock().complete_reindex_calls
    }

    pub fn delete_attribute_calls(&self) -> u32 {
        self.state.lock().delete_attribute_calls
    }

    fn matches(record: &InstanceRecord, filter: &WatermarkFilter) -> bool {
        match filter {
            WatermarkFilter::All => true,
            WatermarkFilter::CreatedBefore(cutoff) => record.created_at < *cutoff,
            WatermarkFilter::CreatedWithin { start, end } => {
                record.created_at >= *start && record.created_at < *end
            }
        }
    }
}

#[async_trait]
impl IndexDataStore for InMemoryIndexStore {
    async fn max_watermark(&self, filter: &WatermarkFilter) -> StoreResult<Option<i64>> {
        let state = self.state.lock();
        Ok(state
            .instances
            .iter()
            .filter(|(_, record)| Self::matches(record, filter))
            .map(|(watermark, _)| *watermark)
            .max())
    }

    async fn watermark_bounds(
        &self,
        filter: &WatermarkFilter,
    ) -> StoreResult<Option<WatermarkRange>> {
        let state = self.state.lock();
        let mut matching = state
            .instances
            .iter()
            .filter(|(_, record)| Self::matches(record, filter))
            .map(|(watermark, _)| *watermark);
        let first = matching.next();
        match first {
            None => Ok(None),
            Some(lo) => {
                let hi = matching.last().unwrap_or(lo);
                WatermarkRange::new(lo, hi)
                    .map(Some)
                    .map_err(|e| StoreError::Contract(e.to_string()))
            }
        }
    }

    async fn reindex_window(
        &self,
        range: WatermarkRange,
        attributes: &[SearchableAttribute],
    ) -> StoreResult<u64> {
        if self
            .fail_reindex_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Contract("injected transient failure".into()));
        }

        let mut state = self.state.lock();
        state.reindexed_windows.push(range);
        let mut updates = Vec::new();
        for (watermark, record) in state.instances.range(range.start()..=range.end()) {
            for attribute in attributes {
                if let Some(value) = record
                    .metadata
                    .get(&attribute.path)
                    .and_then(|v| v.as_str())
                {
                    updates.push((attribute.attribute_id, *watermark, value.to_string()));
                }
            }
        }
        let touched = updates.len() as u64;
        for (attribute_id, watermark, value) in updates {
            state.index.insert((attribute_id, watermark), value);
        }
        Ok(touched)
    }

    async fn delete_attribute_index_window(
        &self,
        path: &str,
        _value_type: AttributeValueType,
        range: WatermarkRange,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock();
        state.deleted_windows.push(range);
        let Some(attribute_id) = state
            .attributes
            .iter()
            .find(|a| a.path == path)
            .map(|a| a.attribute_id)
        else {
            return Ok(0);
        };
        let keys: Vec<(i64, i64)> = state
            .index
            .range((attribute_id, range.start())..=(attribute_id, range.end()))
            .map(|(key, _)| *key)
            .collect();
        let deleted = keys.len() as u64;
        for key in keys {
            state.index.remove(&key);
        }
        Ok(deleted)
    }

    async fn cleanup_window(
        &self,
        range: WatermarkRange,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock();
        state.cleaned_windows.push(range);
        let eligible: Vec<i64> = state
            .fragments
            .range(range.start()..=range.end())
            .map(|(watermark, _)| *watermark)
            .filter(|watermark| {
                state
                    .instances
                    .get(watermark)
                    .map(|record| record.created_at < stale_before)
                    .unwrap_or(false)
            })
            .collect();
        let mut cleaned = 0;
        for watermark in eligible {
            if let Some(payload) = state.fragments.remove(&watermark) {
                // Read-check: never overwrite an already-migrated row.
                state.frame_index.entry(watermark).or_insert(payload);
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    async fn register_attributes(
        &self,
        definitions: &[AttributeDefinition],
    ) -> StoreResult<Vec<SearchableAttribute>> {
        let mut state = self.state.lock();
        let mut registered = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if let Some(existing) = state
                .attributes
                .iter()
                .find(|a| a.path == definition.path && a.value_type == definition.value_type)
            {
                registered.push(existing.clone());
                continue;
            }
            state.next_attribute_id += 1;
            let attribute = SearchableAttribute {
                attribute_id: state.next_attribute_id,
                path: definition.path.clone(),
                value_type: definition.value_type,
                status: AttributeStatus::Adding,
            };
            state.attributes.push(attribute.clone());
            registered.push(attribute);
        }
        Ok(registered)
    }

    async fn find_attribute(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<Option<SearchableAttribute>> {
        Ok(self
            .state
            .lock()
            .attributes
            .iter()
            .find(|a| a.path == path && a.value_type == value_type)
            .cloned())
    }

    async fn assign_reindex_operation(
        &self,
        operation_id: Uuid,
        attribute_ids: &[i64],
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        for attribute_id in attribute_ids {
            let exists = state
                .operations
                .iter()
                .any(|o| o.operation_id == operation_id && o.attribute_id == *attribute_id);
            if !exists {
                state.operations.push(AttributeOperation {
                    attribute_id: *attribute_id,
                    operation_id,
                    status: AttributeOperationStatus::Processing,
                });
            }
        }
        Ok(())
    }

    async fn attributes_processing(
        &self,
        operation_id: Uuid,
    ) -> StoreResult<Vec<SearchableAttribute>> {
        let state = self.state.lock();
        let ids: Vec<i64> = state
            .operations
            .iter()
            .filter(|o| {
                o.operation_id == operation_id
                    && o.status == AttributeOperationStatus::Processing
            })
            .map(|o| o.attribute_id)
            .collect();
        Ok(state
            .attributes
            .iter()
            .filter(|a| ids.contains(&a.attribute_id))
            .cloned()
            .collect())
    }

    async fn complete_reindex(&self, operation_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.complete_reindex_calls += 1;
        let ids: Vec<i64> = state
            .operations
            .iter()
            .filter(|o| {
                o.operation_id == operation_id
                    && o.status == AttributeOperationStatus::Processing
            })
            .map(|o| o.attribute_id)
            .collect();
        for operation in &mut state.operations {
            if operation.operation_id == operation_id
                && operation.status == AttributeOperationStatus::Processing
            {
                operation.status = AttributeOperationStatus::Completed;
            }
        }
        for attribute in &mut state.attributes {
            if ids.contains(&attribute.attribute_id)
                && attribute.status == AttributeStatus::Adding
            {
                attribute.status = AttributeStatus::Ready;
            }
        }
        Ok(())
    }

    async fn mark_attribute_deleting(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        for attribute in &mut state.attributes {
            if attribute.path == path && attribute.value_type == value_type {
                attribute.status = AttributeStatus::Deleting;
            }
        }
        Ok(())
    }

    async fn delete_attribute(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.delete_attribute_calls += 1;
        state
            .attributes
            .retain(|a| !(a.path == path && a.value_type == value_type));
        Ok(())
    }
}

/// In-memory [`BlobMigrationStore`] that records copied windows.
#[derive(Debug, Default)]
pub struct RecordingBlobStore {
    copied_windows: Mutex<Vec<WatermarkRange>>,
}

impl RecordingBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copied_windows(&self) -> Vec<WatermarkRange> {
        self.copied_windows.lock().clone()
    }
}

#[async_trait]
impl BlobMigrationStore for RecordingBlobStore {
    async fn copy_window(&self, range: WatermarkRange) -> StoreResult<u64> {
        self.copied_windows.lock().push(range);
        Ok(range.span())
    }
}

/// In-memory [`ExportSink`] with configurable per-item read failures.
#[derive(Debug, Default)]
pub struct RecordingExportSink {
    failing_identifiers: Vec<String>,
    copied: Mutex<Vec<String>>,
    errors: Mutex<Vec<ExportErrorRecord>>,
    flush_calls: AtomicU32,
}

impl RecordingExportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(identifiers: Vec<String>) -> Self {
        Self {
            failing_identifiers: identifiers,
            ..Self::default()
        }
    }

    pub fn copied(&self) -> Vec<String> {
        self.copied.lock().clone()
    }

    pub fn errors(&self) -> Vec<ExportErrorRecord> {
        self.errors.lock().clone()
    }

    pub fn flush_calls(&self) -> u32 {
        self.flush_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExportSink for RecordingExportSink {
    async fn copy(&self, item: &ExportItem) -> StoreResult<ExportCopyOutcome> {
        if self.failing_identifiers.contains(&item.identifier) {
            return Ok(ExportCopyOutcome::Failed {
                reason: "source read failed".to_string(),
            });
        }
        self.copied.lock().push(item.identifier.clone());
        Ok(ExportCopyOutcome::Copied)
    }

    async fn write_error(&self, record: ExportErrorRecord) -> StoreResult<()> {
        self.errors.lock().push(record);
        Ok(())
    }

    async fn flush_errors(&self) -> StoreResult<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
