//! # Object-Store Blob Collaborators
//!
//! Production implementations of the blob-side contracts over the
//! `object_store` abstraction, so the same code drives local filesystem,
//! in-memory, and cloud-bucket destinations.
//!
//! - [`ObjectStoreBlobCopier`] duplicates per-instance objects into the new
//!   storage layout for the copy/migration operation.
//! - [`ObjectStoreExportSink`] writes exported objects to a destination
//!   store and buffers structured error records, flushed as a single error
//!   log when the run finalizes.

use async_trait::async_trait;
use object_store::path::Path;
use object_store::ObjectStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::models::WatermarkRange;
use crate::store::{
    BlobMigrationStore, ExportCopyOutcome, ExportErrorRecord, ExportItem, ExportSink,
    StoreResult,
};

/// Name of the structured error log written next to exported objects.
const ERROR_LOG_NAME: &str = "errors.log";

fn instance_path(prefix: &str, key: impl std::fmt::Display) -> Path {
    Path::from(format!("{prefix}/{key}"))
}

/// Copies per-instance blobs from the current layout prefix to the new one.
pub struct ObjectStoreBlobCopier {
    store: Arc<dyn ObjectStore>,
    source_prefix: String,
    destination_prefix: String,
}

impl ObjectStoreBlobCopier {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        source_prefix: impl Into<String>,
        destination_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            source_prefix: source_prefix.into(),
            destination_prefix: destination_prefix.into(),
        }
    }
}

#[async_trait]
impl BlobMigrationStore for ObjectStoreBlobCopier {
    async fn copy_window(&self, range: WatermarkRange) -> StoreResult<u64> {
        let mut copied = 0;
        for watermark in range.start()..=range.end() {
            let from = instance_path(&self.source_prefix, watermark);
            let to = instance_path(&self.destination_prefix, watermark);
            // Watermarks with no remaining object (deleted instances) are
            // skipped; the copy itself is overwrite-equivalent.
            match self.store.copy(&from, &to).await {
                Ok(()) => copied += 1,
                Err(object_store::Error::NotFound { .. }) => {
                    debug!(watermark = watermark, "No object for watermark, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(copied)
    }
}

/// Export destination over a source and a destination object store.
pub struct ObjectStoreExportSink {
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    source_prefix: String,
    destination_prefix: String,
    error_buffer: Mutex<Vec<ExportErrorRecord>>,
}

impl ObjectStoreExportSink {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        destination: Arc<dyn ObjectStore>,
        source_prefix: impl Into<String>,
        destination_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source,
            destination,
            source_prefix: source_prefix.into(),
            destination_prefix: destination_prefix.into(),
            error_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Destination path of the flushed error log.
    pub fn error_log_path(&self) -> Path {
        instance_path(&self.destination_prefix, ERROR_LOG_NAME)
    }
}

#[async_trait]
impl ExportSink for ObjectStoreExportSink {
    async fn copy(&self, item: &ExportItem) -> StoreResult<ExportCopyOutcome> {
        let from = instance_path(&self.source_prefix, &item.identifier);

        // A missing or unreadable source object is data-level: the batch
        // carries it as a failed count instead of faulting.
        let payload = match self.source.get(&from).await {
            Ok(result) => match result.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(ExportCopyOutcome::Failed {
                        reason: format!("source read failed: {e}"),
                    })
                }
            },
            Err(object_store::Error::NotFound { .. }) => {
                return Ok(ExportCopyOutcome::Failed {
                    reason: "source object not found".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let to = instance_path(&self.destination_prefix, &item.identifier);
        self.destination.put(&to, payload.into()).await?;
        Ok(ExportCopyOutcome::Copied)
    }

    async fn write_error(&self, record: ExportErrorRecord) -> StoreResult<()> {
        self.error_buffer.lock().push(record);
        Ok(())
    }

    async fn flush_errors(&self) -> StoreResult<()> {
        let records = {
            let mut buffer = self.error_buffer.lock();
            std::mem::take(&mut *buffer)
        };
        if records.is_empty() {
            return Ok(());
        }

        let mut log = String::new();
        for record in &records {
            // One JSON record per line.
            log.push_str(&serde_json::to_string(record).unwrap_or_default());
            log.push('\n');
        }
        self.destination
            .put(&self.error_log_path(), log.into_bytes().into())
            .await?;
        debug!(records = records.len(), "Export error log flushed");
        Ok(())
    }
}
