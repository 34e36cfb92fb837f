//! # Operation Runtime
//!
//! In-process hosting runtime for background operations. Owns the per-run
//! instance records (status, immutable creation time, latest serialized
//! checkpoint), drives the continuation loop by re-invoking
//! [`OperationLoop::run_cycle`] with each merged checkpoint until terminal,
//! and carries the per-operation cancellation signal.
//!
//! The instance record is the authority the `Start` state reads its one-time
//! `created_time` from, and the only thing the status projection consults;
//! checkpoints are persisted here exactly once per successful cycle, never
//! mid-cycle.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::models::OperationKind;
use crate::orchestration::checkpoint::OperationCheckpoint;
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::operation::BatchOperation;
use crate::orchestration::operation_loop::{CycleOutcome, LoopPolicies, OperationLoop};

/// Internal runtime status of an operation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    /// Registered, not yet picked up by a driver.
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RuntimeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Snapshot of one operation instance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationInstance {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub status: RuntimeStatus,
    /// Captured once at registration; immutable thereafter.
    pub created_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Latest persisted checkpoint, serialized.
    pub checkpoint: serde_json::Value,
    pub percent_complete: Option<u8>,
    pub resources: Vec<String>,
    pub cancel_requested: bool,
}

/// In-process operation runtime.
#[derive(Debug, Default)]
pub struct OperationRuntime {
    instances: DashMap<Uuid, OperationInstance>,
}

impl OperationRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new operation id and create its instance record.
    pub fn register(&self, kind: OperationKind) -> Uuid {
        let operation_id = Uuid::new_v4();
        let now = Utc::now();
        self.instances.insert(
            operation_id,
            OperationInstance {
                operation_id,
                kind,
                status: RuntimeStatus::Pending,
                created_time: now,
                last_updated: now,
                checkpoint: serde_json::Value::Null,
                percent_complete: None,
                resources: Vec::new(),
                cancel_requested: false,
            },
        );
        info!(operation_id = %operation_id, kind = %kind, "Operation registered");
        operation_id
    }

    /// Snapshot an instance record.
    pub fn get_instance(&self, operation_id: Uuid) -> Option<OperationInstance> {
        self.instances
            .get(&operation_id)
            .map(|entry| entry.value().clone())
    }

    /// Request cancellation. Prevents scheduling of further cycles; batches
    /// already dispatched are allowed to finish since each is idempotent.
    pub fn cancel(&self, operation_id: Uuid) -> OrchestrationResult<()> {
        let mut entry = self
            .instances
            .get_mut(&operation_id)
            .ok_or(OrchestrationError::InstanceNotFound(operation_id))?;
        if !entry.status.is_terminal() {
            entry.cancel_requested = true;
            entry.last_updated = Utc::now();
            info!(operation_id = %operation_id, "Cancellation requested");
        }
        Ok(())
    }

    fn cancel_requested(&self, operation_id: Uuid) -> bool {
        self.instances
            .get(&operation_id)
            .map(|entry| entry.cancel_requested)
            .unwrap_or(false)
    }

    fn mark_status(&self, operation_id: Uuid, status: RuntimeStatus) {
        if let Some(mut entry) = self.instances.get_mut(&operation_id) {
            entry.status = status;
            entry.last_updated = Utc::now();
        }
    }

    fn persist_checkpoint<K: OperationCheckpoint>(
        &self,
        operation_id: Uuid,
        status: RuntimeStatus,
        checkpoint: &K,
    ) -> OrchestrationResult<()> {
        let serialized = serde_json::to_value(checkpoint)?;
        let mut entry = self
            .instances
            .get_mut(&operation_id)
            .ok_or(OrchestrationError::InstanceNotFound(operation_id))?;
        entry.status = status;
        entry.checkpoint = serialized;
        entry.percent_complete = checkpoint.percent_complete();
        entry.resources = checkpoint.resources();
        entry.last_updated = Utc::now();
        Ok(())
    }

    /// Drive a registered operation to a terminal status.
    ///
    /// This is the explicit outer continuation driver: each successful cycle
    /// persists the merged checkpoint and re-invokes the loop with it as
    /// fresh input, so per-run execution history stays bounded regardless of
    /// dataset size.
    #[instrument(skip(self, engine, initial), fields(operation_id = %operation_id))]
    pub async fn drive<O: BatchOperation>(
        &self,
        operation_id: Uuid,
        engine: &OperationLoop<O>,
        initial: O::Checkpoint,
    ) -> OrchestrationResult<RuntimeStatus> {
        let instance = self
            .get_instance(operation_id)
            .ok_or(OrchestrationError::InstanceNotFound(operation_id))?;

        self.mark_status(operation_id, RuntimeStatus::Running);

        // Start state: capture created_time exactly once from the runtime's
        // own immutable record, then run the operation's one-time setup.
        let mut checkpoint = initial;
        if checkpoint.created_time().is_none() {
            checkpoint.set_created_time(instance.created_time);
        }
        checkpoint = match engine.operation().prepare(operation_id, checkpoint).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(operation_id = %operation_id, error = %e, "Operation setup failed");
                self.mark_status(operation_id, RuntimeStatus::Failed);
                return Err(e);
            }
        };
        self.persist_checkpoint(operation_id, RuntimeStatus::Running, &checkpoint)?;

        loop {
            if self.cancel_requested(operation_id) {
                info!(operation_id = %operation_id, "Operation canceled, no further cycles");
                self.mark_status(operation_id, RuntimeStatus::Canceled);
                return Ok(RuntimeStatus::Canceled);
            }

            match engine.run_cycle(operation_id, &checkpoint).await {
                Ok(CycleOutcome::Continue(next)) => {
                    checkpoint = next;
                    self.persist_checkpoint(operation_id, RuntimeStatus::Running, &checkpoint)?;
                }
                Ok(CycleOutcome::Finalized(done)) => {
                    self.persist_checkpoint(operation_id, RuntimeStatus::Completed, &done)?;
                    info!(operation_id = %operation_id, "Operation completed");
                    return Ok(RuntimeStatus::Completed);
                }
                Err(e) => {
                    error!(operation_id = %operation_id, error = %e, "Operation cycle failed");
                    self.mark_status(operation_id, RuntimeStatus::Failed);
                    return Err(e);
                }
            }
        }
    }

    /// Register an operation and drive it on a background task.
    ///
    /// Returns the freshly minted operation id immediately; progress and
    /// terminal status are observable through [`Self::get_instance`] and the
    /// status projection.
    pub fn spawn<O>(
        self: &Arc<Self>,
        operation: Arc<O>,
        policies: LoopPolicies,
        initial: O::Checkpoint,
    ) -> Uuid
    where
        O: BatchOperation + 'static,
    {
        let operation_id = self.register(operation.kind());
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let engine = OperationLoop::new(operation, policies);
            // Terminal status is already recorded on the instance; the task
            // itself has nowhere else to report.
            let _ = runtime.drive(operation_id, &engine, initial).await;
        });
        operation_id
    }
}
