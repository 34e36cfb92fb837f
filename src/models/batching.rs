//! # Batching Options
//!
//! Immutable per-operation batching configuration: how wide one batch may be
//! and how many batches one orchestration cycle may dispatch concurrently.

use serde::{Deserialize, Serialize};

/// Error raised for out-of-range batching parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidBatchingOptions {
    #[error("batch size must be at least 1, got {0}")]
    Size(u64),
    #[error("max parallel count must be at least 1, got {0}")]
    MaxParallelCount(usize),
}

/// Bounds on the work issued per orchestration cycle.
///
/// `size` limits the watermark span (or dequeue count) of one batch;
/// `max_parallel_count` limits how many batches are dispatched concurrently
/// in a single cycle. Both are fixed for the lifetime of an operation
/// instance and carried inside its checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchingOptions {
    size: u64,
    max_parallel_count: usize,
}

impl BatchingOptions {
    pub fn new(size: u64, max_parallel_count: usize) -> Result<Self, InvalidBatchingOptions> {
        if size < 1 {
            return Err(InvalidBatchingOptions::Size(size));
        }
        if max_parallel_count < 1 {
            return Err(InvalidBatchingOptions::MaxParallelCount(max_parallel_count));
        }
        Ok(Self {
            size,
            max_parallel_count,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn max_parallel_count(&self) -> usize {
        self.max_parallel_count
    }

    /// Maximum number of watermarks one cycle can retire.
    pub fn cycle_capacity(&self) -> u64 {
        self.size * self.max_parallel_count as u64
    }
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            size: 100,
            max_parallel_count: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_size() {
        assert_eq!(
            BatchingOptions::new(0, 3).unwrap_err(),
            InvalidBatchingOptions::Size(0)
        );
    }

    #[test]
    fn rejects_zero_parallelism() {
        assert_eq!(
            BatchingOptions::new(5, 0).unwrap_err(),
            InvalidBatchingOptions::MaxParallelCount(0)
        );
    }

    #[test]
    fn cycle_capacity_is_size_times_parallelism() {
        let options = BatchingOptions::new(5, 3).unwrap();
        assert_eq!(options.cycle_capacity(), 15);
    }
}
