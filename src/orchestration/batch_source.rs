//! # Batch Sources
//!
//! Produces the next bounded set of work descriptors given a resumable
//! cursor. Two strategies sit behind the one [`BatchSource`] contract:
//!
//! - [`RangeWindowedSource`] carves contiguous watermark windows out of a
//!   fixed run range, walking from the unprocessed edge toward the opposite
//!   bound. Used by reindex, blob copy, attribute delete, and cleanup.
//! - [`QueueDequeueSource`] pulls pre-expanded work items from a resumable
//!   external enumerator. Used by export.
//!
//! Sources never mutate anything; they are pure given the cursor plus, for
//! the queue strategy, the enumerator's own position encoding.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::WatermarkRange;
use crate::orchestration::errors::OrchestrationResult;
use crate::store::{ExportItem, ExportSource};

/// One cycle's worth of batches plus the advanced cursor.
#[derive(Debug, Clone)]
pub struct BatchSet<B, C> {
    pub batches: Vec<B>,
    /// Cursor positioned past the returned batches. For the range strategy
    /// the cursor only moves when progress is merged, so this equals the
    /// input cursor; for the queue strategy it carries the enumerator's new
    /// continuation description.
    pub next_cursor: C,
    /// True once the computed batch set is empty.
    pub exhausted: bool,
}

/// Common contract over both batching strategies.
#[async_trait]
pub trait BatchSource: Send + Sync {
    type Batch: Send + Sync;
    type Cursor: Clone + Send + Sync;

    /// Produce up to `max_count` batches starting at `cursor`.
    async fn next_batches(
        &self,
        cursor: &Self::Cursor,
        max_count: usize,
    ) -> OrchestrationResult<BatchSet<Self::Batch, Self::Cursor>>;
}

/// Direction the range strategy walks the watermark axis.
///
/// Reindex and copy walk descending so the newest un-migrated data is
/// processed first; time-windowed cleanup walks ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkDirection {
    Descending,
    Ascending,
}

/// Cursor for the range-windowed strategy.
///
/// `bound` is the run's fixed full range, resolved exactly once when the run
/// starts so records written during the run cannot unboundedly extend its
/// scope. `completed` is the merged progress range; the unprocessed edge is
/// one watermark beyond it, or the fixed bound itself before the first
/// completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCursor {
    pub bound: Option<WatermarkRange>,
    pub completed: Option<WatermarkRange>,
}

impl RangeCursor {
    /// Cursor for a run whose filter matched no instances at all.
    pub fn empty() -> Self {
        Self {
            bound: None,
            completed: None,
        }
    }

    pub fn over(bound: WatermarkRange) -> Self {
        Self {
            bound: Some(bound),
            completed: None,
        }
    }
}

/// Compute up to `max_count` disjoint windows of at most `size` watermarks,
/// walking from the unprocessed edge toward the opposite bound. The boundary
/// window is clamped inclusively against the fixed bound.
pub fn compute_windows(
    bound: WatermarkRange,
    completed: Option<WatermarkRange>,
    size: u64,
    max_count: usize,
    direction: WalkDirection,
) -> Vec<WatermarkRange> {
    let width = size.max(1) as i64;
    let mut windows = Vec::new();

    match direction {
        WalkDirection::Descending => {
            let mut hi = match completed {
                None => bound.end(),
                Some(done) => done.start() - 1,
            };
            while windows.len() < max_count && hi >= bound.start() {
                let lo = bound.start().max(hi - (width - 1));
                windows.push(WatermarkRange::new(lo, hi).expect("lo clamped below hi"));
                hi = lo - 1;
            }
        }
        WalkDirection::Ascending => {
            let mut lo = match completed {
                None => bound.start(),
                Some(done) => done.end() + 1,
            };
            while windows.len() < max_count && lo <= bound.end() {
                let hi = bound.end().min(lo + (width - 1));
                windows.push(WatermarkRange::new(lo, hi).expect("hi clamped above lo"));
                lo = hi + 1;
            }
        }
    }

    windows
}

/// Range-windowed batching strategy.
#[derive(Debug, Clone, Copy)]
pub struct RangeWindowedSource {
    direction: WalkDirection,
    size: u64,
}

impl RangeWindowedSource {
    pub fn new(direction: WalkDirection, size: u64) -> Self {
        Self { direction, size }
    }

    pub fn descending(size: u64) -> Self {
        Self::new(WalkDirection::Descending, size)
    }

    pub fn ascending(size: u64) -> Self {
        Self::new(WalkDirection::Ascending, size)
    }
}

#[async_trait]
impl BatchSource for RangeWindowedSource {
    type Batch = WatermarkRange;
    type Cursor = RangeCursor;

    async fn next_batches(
        &self,
        cursor: &RangeCursor,
        max_count: usize,
    ) -> OrchestrationResult<BatchSet<WatermarkRange, RangeCursor>> {
        let windows = match cursor.bound {
            None => Vec::new(),
            Some(bound) => {
                compute_windows(bound, cursor.completed, self.size, max_count, self.direction)
            }
        };

        let exhausted = windows.is_empty();
        Ok(BatchSet {
            batches: windows,
            next_cursor: *cursor,
            exhausted,
        })
    }
}

/// Cursor for the queue-dequeue strategy: the enumerator's serializable
/// continuation description, or `None` once the enumerator reports it is
/// conceptually done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCursor {
    pub description: Option<serde_json::Value>,
}

impl QueueCursor {
    pub fn start<S: ExportSource + ?Sized>(source: &S) -> Self {
        Self {
            description: source.initial_description(),
        }
    }
}

/// Queue-dequeue batching strategy over an [`ExportSource`] enumerator.
pub struct QueueDequeueSource<S: ExportSource + ?Sized> {
    source: Arc<S>,
    max_items_per_batch: usize,
}

impl<S: ExportSource + ?Sized> QueueDequeueSource<S> {
    pub fn new(source: Arc<S>, max_items_per_batch: usize) -> Self {
        Self {
            source,
            max_items_per_batch: max_items_per_batch.max(1),
        }
    }
}

#[async_trait]
impl<S: ExportSource + ?Sized> BatchSource for QueueDequeueSource<S> {
    type Batch = Vec<ExportItem>;
    type Cursor = QueueCursor;

    async fn next_batches(
        &self,
        cursor: &QueueCursor,
        max_count: usize,
    ) -> OrchestrationResult<BatchSet<Vec<ExportItem>, QueueCursor>> {
        let mut description = cursor.description.clone();
        let mut batches = Vec::new();

        for _ in 0..max_count {
            let Some(current) = &description else {
                break;
            };
            let outcome = self
                .source
                .try_dequeue(current, self.max_items_per_batch)
                .await?;
            description = outcome.next_description;
            if outcome.items.is_empty() {
                break;
            }
            batches.push(outcome.items);
        }

        let exhausted = batches.is_empty();
        Ok(BatchSet {
            batches,
            next_cursor: QueueCursor { description },
            exhausted,
        })
    }
}
