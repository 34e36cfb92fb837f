//! # Watermark Model
//!
//! Primitive value types shared by every background operation.
//!
//! A *watermark* is the monotonically increasing sequence number assigned to a
//! stored instance at creation time. Background operations never enumerate
//! instances directly; they carve the watermark axis into contiguous,
//! inclusive ranges and hand each range to an idempotent batch processor.
//! The same type is used both to delimit one unit of work and to represent
//! cumulative completed progress, so adjacency and merging rules live here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest watermark the store ever assigns.
pub const FIRST_WATERMARK: i64 = 1;

/// Error raised when constructing an inverted watermark range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid watermark range: start {start} exceeds end {end}")]
pub struct InvalidWatermarkRange {
    pub start: i64,
    pub end: i64,
}

/// An inclusive, contiguous block of watermarks.
///
/// Invariant: `start <= end`, enforced at construction. Two ranges are
/// adjacent when they abut with no gap (`a.start == b.end + 1` or vice
/// versa); adjacent or overlapping ranges can be merged into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatermarkRange {
    start: i64,
    end: i64,
}

impl WatermarkRange {
    /// Create a range covering `[start, end]`.
    pub fn new(start: i64, end: i64) -> Result<Self, InvalidWatermarkRange> {
        if start > end {
            return Err(InvalidWatermarkRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// A range covering a single watermark.
    pub fn single(watermark: i64) -> Self {
        Self {
            start: watermark,
            end: watermark,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Number of watermarks covered by this range.
    pub fn span(&self) -> u64 {
        (self.end - self.start) as u64 + 1
    }

    pub fn contains(&self, watermark: i64) -> bool {
        watermark >= self.start && watermark <= self.end
    }

    pub fn overlaps(&self, other: &WatermarkRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// True when `other` abuts this range with no gap between them.
    pub fn abuts(&self, other: &WatermarkRange) -> bool {
        self.start == other.end + 1 || other.start == self.end + 1
    }

    /// Merge with an adjacent or overlapping range.
    ///
    /// Returns `None` when the ranges are disjoint with a gap between them,
    /// since the result would no longer be contiguous.
    pub fn merge(&self, other: &WatermarkRange) -> Option<WatermarkRange> {
        if self.overlaps(other) || self.abuts(other) {
            Some(WatermarkRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }
}

impl fmt::Display for WatermarkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Fold a set of mutually adjacent ranges into the accumulated completed
/// range, in any order.
///
/// Returns `None` when the inputs do not form one contiguous block together
/// with `completed`; callers treat that as a merge-logic defect rather than
/// silently recording gapped progress.
pub fn accumulate_completed(
    completed: Option<WatermarkRange>,
    mut ranges: Vec<WatermarkRange>,
) -> Option<WatermarkRange> {
    ranges.sort_by_key(WatermarkRange::start);
    let mut acc = completed;
    for range in ranges {
        acc = match acc {
            None => Some(range),
            Some(current) => current.merge(&range),
        };
        acc.as_ref()?;
    }
    acc
}
