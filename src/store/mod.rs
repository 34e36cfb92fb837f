//! # Store Collaborators
//!
//! Contracts the orchestration engine consumes from the storage layer, plus
//! the production implementations backed by PostgreSQL ([`sql`]) and an
//! object store ([`blob`]).
//!
//! The engine never talks to storage directly; every operation is wired to
//! one or more of these traits so that the SQL metadata store, the blob
//! store, and export sources/sinks can evolve independently. All mutating
//! contracts are idempotent by design: re-running a window converges on the
//! same store state (equal index values no-op, deleting an absent row
//! succeeds, blob copies are overwrite-equivalent).

pub mod blob;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AttributeDefinition, AttributeValueType, SearchableAttribute, WatermarkRange,
};

/// Errors surfaced by store collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store contract violation: {0}")]
    Contract(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter applied to watermark queries when resolving a run's fixed bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatermarkFilter {
    /// Every stored instance.
    All,
    /// Instances created strictly before the given time.
    CreatedBefore(DateTime<Utc>),
    /// Instances created within `[start, end)`.
    CreatedWithin {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Instance/attribute metadata store.
///
/// Backs the range-windowed operations: watermark bound resolution, windowed
/// index mutations, and the attribute lifecycle used by reindex and
/// attribute-delete runs.
#[async_trait]
pub trait IndexDataStore: Send + Sync {
    /// Highest watermark currently matching `filter`, if any instance does.
    async fn max_watermark(&self, filter: &WatermarkFilter) -> StoreResult<Option<i64>>;

    /// Full `[min, max]` watermark bounds matching `filter`.
    async fn watermark_bounds(&self, filter: &WatermarkFilter)
        -> StoreResult<Option<WatermarkRange>>;

    /// (Re)compute and persist index rows for `attributes` over every
    /// instance whose watermark falls in `range`. Instances already indexed
    /// with an equal value are untouched. Returns the number of instances
    /// visited.
    async fn reindex_window(
        &self,
        range: WatermarkRange,
        attributes: &[SearchableAttribute],
    ) -> StoreResult<u64>;

    /// Delete all index rows for the given attribute key + value type within
    /// `range`. Absent rows are not an error. Returns rows deleted.
    async fn delete_attribute_index_window(
        &self,
        path: &str,
        value_type: AttributeValueType,
        range: WatermarkRange,
    ) -> StoreResult<u64>;

    /// Migrate or remove stale derived frame/metadata rows for instances in
    /// `range` whose derived data predates `stale_before`. Implementations
    /// must read-check before mutating so repeats converge. Returns rows
    /// cleaned.
    async fn cleanup_window(
        &self,
        range: WatermarkRange,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Register attribute definitions, returning the stored rows. Re-registering
    /// an existing path/value-type pair returns the existing row.
    async fn register_attributes(
        &self,
        definitions: &[AttributeDefinition],
    ) -> StoreResult<Vec<SearchableAttribute>>;

    /// Look up one attribute by key.
    async fn find_attribute(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<Option<SearchableAttribute>>;

    /// Create per-attribute progress rows binding `attribute_ids` to a
    /// reindex run with status `Processing`.
    async fn assign_reindex_operation(
        &self,
        operation_id: Uuid,
        attribute_ids: &[i64],
    ) -> StoreResult<()>;

    /// Attributes still `Processing` for the given reindex run. The engine
    /// re-applies this filter every cycle; a concurrent actor removing an
    /// attribute from the set is the coordination mechanism.
    async fn attributes_processing(
        &self,
        operation_id: Uuid,
    ) -> StoreResult<Vec<SearchableAttribute>>;

    /// Mark a reindex run's remaining progress rows `Completed` and flip the
    /// covered attributes to `Ready`.
    async fn complete_reindex(&self, operation_id: Uuid) -> StoreResult<()>;

    /// Flip an attribute to `Deleting` ahead of an attribute-delete run.
    async fn mark_attribute_deleting(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<()>;

    /// Remove the attribute metadata row itself. Invoked from finalize, once
    /// the run's windows are exhausted.
    async fn delete_attribute(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<()>;
}

/// Blob-side collaborator for the copy/migration operation.
#[async_trait]
pub trait BlobMigrationStore: Send + Sync {
    /// Duplicate the stored object for every instance in `range` to its new
    /// location. Overwrite-equivalent, so re-running a window is safe.
    /// Returns objects copied.
    async fn copy_window(&self, range: WatermarkRange) -> StoreResult<u64>;
}

/// One unit of exportable data, addressed by its stored identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportItem {
    pub identifier: String,
}

impl ExportItem {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

/// Outcome of copying one export item.
///
/// A failed source read is data, not a fault: it becomes an error-log record
/// and a `failed` count rather than aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportCopyOutcome {
    Copied,
    Failed { reason: String },
}

/// Structured record written to the export error log for one failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportErrorRecord {
    pub identifier: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Destination sink for the export operation.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Pull the item's source data and write it to the destination.
    /// Data-level failures are reported through [`ExportCopyOutcome::Failed`];
    /// `Err` is reserved for infrastructure faults, which the engine retries.
    async fn copy(&self, item: &ExportItem) -> StoreResult<ExportCopyOutcome>;

    /// Buffer a structured error record for the side error log.
    async fn write_error(&self, record: ExportErrorRecord) -> StoreResult<()>;

    /// Flush buffered error records to durable storage. Invoked from the
    /// export run's finalize activity.
    async fn flush_errors(&self) -> StoreResult<()>;
}

/// Result of one dequeue call on an export source.
#[derive(Debug, Clone)]
pub struct DequeueOutcome {
    pub items: Vec<ExportItem>,
    /// Continuation description for the next dequeue. `None` means the
    /// enumerator is conceptually done, not merely empty this cycle.
    pub next_description: Option<serde_json::Value>,
}

/// Resumable sequential enumerator of export work items.
///
/// The description is an opaque serializable continuation owned by the
/// source; the engine stores it verbatim in the export checkpoint.
#[async_trait]
pub trait ExportSource: Send + Sync {
    /// Description for a fresh run; `None` when there is nothing to
    /// enumerate at all.
    fn initial_description(&self) -> Option<serde_json::Value>;

    /// Dequeue up to `max_items` items from the position encoded in
    /// `description`.
    async fn try_dequeue(
        &self,
        description: &serde_json::Value,
        max_items: usize,
    ) -> StoreResult<DequeueOutcome>;
}

/// Continuation description used by [`IdentifierListSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierListDescription {
    pub offset: usize,
    pub total: usize,
}

/// Export source over a caller-supplied identifier list.
#[derive(Debug, Clone)]
pub struct IdentifierListSource {
    identifiers: Vec<String>,
}

impl IdentifierListSource {
    pub fn new(identifiers: Vec<String>) -> Self {
        Self { identifiers }
    }
}

#[async_trait]
impl ExportSource for IdentifierListSource {
    fn initial_description(&self) -> Option<serde_json::Value> {
        if self.identifiers.is_empty() {
            return None;
        }
        let description = IdentifierListDescription {
            offset: 0,
            total: self.identifiers.len(),
        };
        serde_json::to_value(description).ok()
    }

    async fn try_dequeue(
        &self,
        description: &serde_json::Value,
        max_items: usize,
    ) -> StoreResult<DequeueOutcome> {
        let description: IdentifierListDescription = serde_json::from_value(description.clone())
            .map_err(|e| StoreError::Contract(format!("bad identifier-list description: {e}")))?;

        let remaining = &self.identifiers[description.offset.min(self.identifiers.len())..];
        let taken = remaining.len().min(max_items);
        let items = remaining[..taken].iter().map(ExportItem::new).collect();

        let next_offset = description.offset + taken;
        let next_description = if next_offset >= self.identifiers.len() {
            None
        } else {
            serde_json::to_value(IdentifierListDescription {
                offset: next_offset,
                total: description.total,
            })
            .ok()
        };

        Ok(DequeueOutcome {
            items,
            next_description,
        })
    }
}
