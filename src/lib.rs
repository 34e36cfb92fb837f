#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Imaging Store Background Operations
//!
//! Resumable batch-orchestration core for the long-running, dataset-wide
//! maintenance operations of a medical imaging data service: attribute
//! reindexing, blob copy/migration, attribute deletion, time-windowed
//! cleanup, and bulk export.
//!
//! ## Overview
//!
//! Every operation may touch millions of stored instances, must survive
//! process restarts, must not overwhelm the storage backend, and must make
//! externally observable, monotonic progress. The engine provides
//! exactly-once-checkpointed, at-least-once-executed processing over an
//! unbounded, concurrently mutating dataset using bounded units of work, a
//! restart-safe continuation mechanism, and bounded parallelism per cycle.
//!
//! ## Architecture
//!
//! The [`orchestration`] module carries the shared skeleton: a polymorphic
//! batch source (range-windowed over the watermark axis, or queue-dequeue
//! over an external enumerator), idempotent batch processors dispatched with
//! per-invocation retry, a serializable checkpoint merged once per fully
//! successful cycle, and a continuation driver that restarts the loop with
//! each merged checkpoint so per-run execution history stays bounded.
//!
//! ## Module Organization
//!
//! - [`models`] - Watermark ranges, batching options, attribute and
//!   operation vocabulary
//! - [`store`] - Collaborator contracts plus the PostgreSQL and
//!   object-store implementations
//! - [`orchestration`] - The batch-orchestration engine, operation runtime,
//!   and status projection
//! - [`config`] - Environment-driven configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging initialization
//! - [`test_support`] - In-memory collaborator fakes shared by tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use imagestore_ops::config::OperationsConfig;
//! use imagestore_ops::models::{AttributeDefinition, AttributeValueType};
//! use imagestore_ops::orchestration::operations::{
//!     ReindexCheckpoint, ReindexOperation, ReindexRequest,
//! };
//! use imagestore_ops::orchestration::OperationRuntime;
//! use imagestore_ops::store::sql::SqlIndexStore;
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let config = OperationsConfig::from_env()?;
//! let store = Arc::new(SqlIndexStore::new(pool));
//! let runtime = Arc::new(OperationRuntime::new());
//!
//! let request = ReindexRequest {
//!     definitions: vec![AttributeDefinition::new(
//!         "00100020",
//!         AttributeValueType::String,
//!     )],
//!     batching: config.default_batching()?,
//! };
//! let operation_id = runtime.spawn(
//!     Arc::new(ReindexOperation::new(store)),
//!     config.loop_policies(),
//!     ReindexCheckpoint::from_request(request),
//! );
//! println!("started reindex operation {operation_id}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod store;
pub mod test_support;

pub use config::OperationsConfig;
pub use error::{Error, Result};
pub use models::{
    BatchingOptions, OperationKind, OperationStatus, WatermarkRange,
};
pub use orchestration::{
    BatchOperation, BatchSource, CycleOutcome, LoopPolicies, OperationLoop, OperationRuntime,
    StatusProjector,
};
