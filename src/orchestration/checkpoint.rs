//! # Checkpoint Contract
//!
//! Serializable accumulated state of a run, sufficient to resume it from
//! scratch. Each operation kind carries its own checkpoint struct; this trait
//! is the surface the engine and the status projection need from all of them.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{BatchingOptions, WatermarkRange};

/// Common shape of every operation checkpoint.
///
/// `created_time` is captured exactly once, in the loop's `Start` state, from
/// the hosting runtime's own instance record; the continuation mechanism does
/// not otherwise preserve it across restarts.
pub trait OperationCheckpoint:
    Clone + Send + Sync + Serialize + DeserializeOwned + std::fmt::Debug
{
    fn batching(&self) -> BatchingOptions;

    fn created_time(&self) -> Option<DateTime<Utc>>;

    fn set_created_time(&mut self, created_time: DateTime<Utc>);

    /// Percent complete derived from accumulated progress relative to the
    /// run's fixed bound. `None` when the run has no meaningful denominator.
    fn percent_complete(&self) -> Option<u8>;

    /// Operation-specific resource identifiers (e.g. attribute paths) for
    /// the status projection to resolve into URIs.
    fn resources(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Percent of `bound` covered by `completed`, for range-windowed checkpoints.
pub fn range_percent_complete(
    completed: Option<WatermarkRange>,
    bound: Option<WatermarkRange>,
) -> Option<u8> {
    let bound = bound?;
    let done = completed.map_or(0, |range| range.span());
    Some((done * 100 / bound.span()).min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: i64, end: i64) -> WatermarkRange {
        WatermarkRange::new(start, end).unwrap()
    }

    #[test]
    fn percent_of_unresolved_bound_is_unknown() {
        assert_eq!(range_percent_complete(None, None), None);
    }

    #[test]
    fn percent_counts_completed_span() {
        let bound = Some(range(1, 50));
        assert_eq!(range_percent_complete(None, bound), Some(0));
        assert_eq!(range_percent_complete(Some(range(36, 50)), bound), Some(30));
        assert_eq!(range_percent_complete(Some(range(1, 50)), bound), Some(100));
    }
}
