//! # Status Projection
//!
//! Maps the runtime's instance record (status + latest checkpoint fields)
//! into the externally visible operation state served by the operations API.
//! Resource identifiers recorded on the checkpoint are resolved into
//! addressable URIs through a collaborator URL resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{OperationKind, OperationStatus};
use crate::orchestration::runtime::{OperationRuntime, RuntimeStatus};

/// Resolves operation-specific resource identifiers into URIs.
pub trait UrlResolver: Send + Sync {
    fn resolve(&self, resource: &str) -> String;
}

/// Resolver that joins resources onto a fixed base URL.
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base_url: String,
}

impl BaseUrlResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }
}

impl UrlResolver for BaseUrlResolver {
    fn resolve(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource.trim_start_matches('/'))
    }
}

/// Externally visible state of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationState {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub created_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub percent_complete: Option<u8>,
    pub resources: Vec<String>,
}

/// Projects runtime instance records into [`OperationState`].
pub struct StatusProjector {
    runtime: Arc<OperationRuntime>,
    resolver: Arc<dyn UrlResolver>,
}

impl StatusProjector {
    pub fn new(runtime: Arc<OperationRuntime>, resolver: Arc<dyn UrlResolver>) -> Self {
        Self { runtime, resolver }
    }

    /// State of the given operation, or `None` for an unknown id.
    pub fn get_state(&self, operation_id: Uuid) -> Option<OperationState> {
        let instance = self.runtime.get_instance(operation_id)?;

        let status = match instance.status {
            RuntimeStatus::Pending => OperationStatus::NotStarted,
            RuntimeStatus::Running => OperationStatus::Running,
            RuntimeStatus::Completed => OperationStatus::Completed,
            RuntimeStatus::Failed => OperationStatus::Failed,
            RuntimeStatus::Canceled => OperationStatus::Canceled,
        };

        // A completed run is 100% by definition, whatever the checkpoint's
        // own denominator could or could not derive.
        let percent_complete = if status == OperationStatus::Completed {
            Some(100)
        } else {
            instance.percent_complete
        };

        let resources = instance
            .resources
            .iter()
            .map(|resource| self.resolver.resolve(resource))
            .collect();

        Some(OperationState {
            operation_id: instance.operation_id,
            kind: instance.kind,
            status,
            created_time: instance.created_time,
            last_updated: instance.last_updated,
            percent_complete,
            resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationKind;

    #[test]
    fn base_url_resolver_normalizes_slashes() {
        let resolver = BaseUrlResolver::new("https://imaging.example.com/v1/");
        assert_eq!(
            resolver.resolve("/attributes/00100020"),
            "https://imaging.example.com/v1/attributes/00100020"
        );
    }

    #[test]
    fn unknown_operation_projects_to_none() {
        let runtime = Arc::new(OperationRuntime::new());
        let projector = StatusProjector::new(
            runtime,
            Arc::new(BaseUrlResolver::new("https://imaging.example.com")),
        );
        assert!(projector.get_state(Uuid::new_v4()).is_none());
    }

    #[test]
    fn pending_instance_projects_as_not_started() {
        let runtime = Arc::new(OperationRuntime::new());
        let id = runtime.register(OperationKind::Reindex);
        let projector = StatusProjector::new(
            runtime,
            Arc::new(BaseUrlResolver::new("https://imaging.example.com")),
        );

        let state = projector.get_state(id).unwrap();
        assert_eq!(state.status, OperationStatus::NotStarted);
        assert_eq!(state.percent_complete, None);
        assert!(state.resources.is_empty());
    }
}
