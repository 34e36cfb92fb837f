//! # Error Types
//!
//! Top-level error surface of the crate. Layer-specific enums
//! ([`crate::store::StoreError`], [`crate::orchestration::OrchestrationError`])
//! carry the detail; this wrapper exists so embedding callers handle one
//! type at the crate boundary.

use crate::orchestration::OrchestrationError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;
