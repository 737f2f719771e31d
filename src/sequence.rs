//! Exactly-once distribution of work-item indices across workers.
//!
//! A [`SequenceCursor`] walks the closed interval `[start, stop]` by a fixed
//! non-zero `step`. Every call to [`SequenceCursor::next`] claims one value with
//! a single compare-and-swap on the count of issued items, so concurrent
//! callers never see the same value twice and nobody blocks beyond the CAS loop.
//!
//! ```
//! use workshare::SequenceCursor;
//!
//! let cursor = SequenceCursor::new(0, 9, 3).unwrap();
//! let mut seen = Vec::new();
//! while let Some(n) = cursor.next() {
//!     seen.push(n);
//! }
//! assert_eq!(seen, vec![0, 3, 6, 9]);
//! assert_eq!(cursor.next(), None);
//! ```

use crate::core::config::SequenceConfig;
use crate::core::errors::{Result, WorkshareError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct CursorInner {
    start: i64,
    stop: i64,
    step: i64,
    len: u64,
    chunk_size: u64,
    issued: AtomicU64,
}

/// Shared, monotonically advancing work-item counter
///
/// Clones share the same position.
#[derive(Debug, Clone)]
pub struct SequenceCursor {
    inner: Arc<CursorInner>,
}

impl SequenceCursor {
    /// Cursor over `[start, stop]` by `step`; fails if `step` is zero
    ///
    /// The issued count is a `u64`, so an interval holding more than
    /// `u64::MAX` values is truncated to its first `u64::MAX`. The only such
    /// intervals are `(i64::MIN, i64::MAX, 1)` and `(i64::MAX, i64::MIN, -1)`,
    /// whose final value (`i64::MAX` and `i64::MIN` respectively) is never
    /// issued.
    pub fn new(start: i64, stop: i64, step: i64) -> Result<Self> {
        if step == 0 {
            return Err(WorkshareError::configuration_field(
                "step must not be zero",
                "step",
            ));
        }

        let len = item_count(start, stop, step);
        debug!(start, stop, step, len, "Sequence cursor created");

        Ok(Self {
            inner: Arc::new(CursorInner {
                start,
                stop,
                step,
                len,
                chunk_size: 1,
                issued: AtomicU64::new(0),
            }),
        })
    }

    pub fn from_config(config: &SequenceConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.start, config.stop, config.step)?.with_chunk_size(config.chunk_size)
    }

    /// Issue up to `chunk_size` items per [`next_chunk`](Self::next_chunk) call
    ///
    /// Must be called before the cursor is shared; it rebuilds the cursor
    /// from its bounds and starts from the beginning.
    pub fn with_chunk_size(self, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(WorkshareError::configuration_field(
                "chunk_size must be greater than 0",
                "chunk_size",
            ));
        }
        Ok(Self {
            inner: Arc::new(CursorInner {
                start: self.inner.start,
                stop: self.inner.stop,
                step: self.inner.step,
                len: self.inner.len,
                chunk_size: chunk_size as u64,
                issued: AtomicU64::new(0),
            }),
        })
    }

    /// Claim the next value, or `None` once the interval is exhausted
    pub fn next(&self) -> Option<i64> {
        let len = self.inner.len;
        let claimed = self
            .inner
            .issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |k| {
                (k < len).then_some(k + 1)
            })
            .ok()?;

        if claimed + 1 == len {
            debug!(len, "Sequence cursor exhausted");
        }
        Some(self.value_at(claimed))
    }

    /// Claim up to `chunk_size` consecutive values in one step
    ///
    /// The final chunk may be shorter than `chunk_size`.
    pub fn next_chunk(&self) -> Option<WorkRange> {
        let len = self.inner.len;
        let chunk = self.inner.chunk_size;
        let claimed = self
            .inner
            .issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |k| {
                (k < len).then(|| k + chunk.min(len - k))
            })
            .ok()?;

        let count = chunk.min(len - claimed);
        if claimed + count == len {
            debug!(len, "Sequence cursor exhausted");
        }
        Some(WorkRange {
            first: self.value_at(claimed),
            step: self.inner.step,
            len: count,
        })
    }

    /// Iterate by repeatedly calling [`next`](Self::next)
    pub fn iter(&self) -> CursorIter<'_> {
        CursorIter { cursor: self }
    }

    /// Reset to the first value
    pub fn rewind(&self) {
        self.inner.issued.store(0, Ordering::Release);
        debug!("Sequence cursor rewound");
    }

    /// Total number of values in the interval
    pub fn len(&self) -> u64 {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn issued(&self) -> u64 {
        self.inner.issued.load(Ordering::Acquire).min(self.inner.len)
    }

    pub fn remaining(&self) -> u64 {
        self.inner.len - self.issued()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// `(start, stop, step)`
    pub fn bounds(&self) -> (i64, i64, i64) {
        (self.inner.start, self.inner.stop, self.inner.step)
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size as usize
    }

    fn value_at(&self, index: u64) -> i64 {
        // index < len keeps the result inside [start, stop]
        (self.inner.start as i128 + index as i128 * self.inner.step as i128) as i64
    }
}

/// Number of values in `[start, stop]` reachable from `start` by `step`.
/// Saturates at `u64::MAX` for the full `i64` range with a unit step.
fn item_count(start: i64, stop: i64, step: i64) -> u64 {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let span = if step > 0 { stop - start } else { start - stop };
    if span < 0 {
        return 0;
    }
    let count = span / step.abs() + 1;
    u64::try_from(count).unwrap_or(u64::MAX)
}

/// Borrowing iterator over a cursor; other clones keep drawing from the same position
pub struct CursorIter<'a> {
    cursor: &'a SequenceCursor,
}

impl Iterator for CursorIter<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        self.cursor.next()
    }
}

/// A chunk of consecutive work items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkRange {
    first: i64,
    step: i64,
    len: u64,
}

impl WorkRange {
    pub fn first(&self) -> i64 {
        self.first
    }

    /// Last value in the chunk (inclusive)
    pub fn end(&self) -> i64 {
        (self.first as i128 + (self.len as i128 - 1) * self.step as i128) as i64
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> WorkRangeIter {
        WorkRangeIter {
            range: *self,
            position: 0,
        }
    }
}

impl IntoIterator for WorkRange {
    type Item = i64;
    type IntoIter = WorkRangeIter;

    fn into_iter(self) -> WorkRangeIter {
        self.iter()
    }
}

pub struct WorkRangeIter {
    range: WorkRange,
    position: u64,
}

impl Iterator for WorkRangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.position >= self.range.len {
            return None;
        }
        let value =
            self.range.first as i128 + self.position as i128 * self.range.step as i128;
        self.position += 1;
        Some(value as i64)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.range.len - self.position) as usize;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_zero_step_rejected() {
        let err = SequenceCursor::new(0, 10, 0).unwrap_err();
        assert!(matches!(err, WorkshareError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_positive_step_inclusive() {
        let cursor = SequenceCursor::new(1, 10, 4).unwrap();
        assert_eq!(cursor.iter().collect::<Vec<_>>(), vec![1, 5, 9]);
        assert_eq!(cursor.len(), 3);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_negative_step() {
        let cursor = SequenceCursor::new(10, 1, -3).unwrap();
        assert_eq!(cursor.iter().collect::<Vec<_>>(), vec![10, 7, 4, 1]);
    }

    #[test]
    fn test_direction_mismatch_is_empty() {
        let cursor = SequenceCursor::new(5, 1, 1).unwrap();
        assert!(cursor.is_empty());
        assert_eq!(cursor.next(), None);

        let cursor = SequenceCursor::new(1, 5, -1).unwrap();
        assert_eq!(cursor.next(), None);
    }

    #[test]
    fn test_single_value_interval() {
        let cursor = SequenceCursor::new(4, 4, 7).unwrap();
        assert_eq!(cursor.next(), Some(4));
        assert_eq!(cursor.next(), None);
    }

    #[test]
    fn test_full_range_saturates_count() {
        let cursor = SequenceCursor::new(i64::MIN, i64::MAX, 1).unwrap();
        assert_eq!(cursor.len(), u64::MAX);
        assert_eq!(cursor.next(), Some(i64::MIN));
        assert_eq!(cursor.next(), Some(i64::MIN + 1));

        let cursor = SequenceCursor::new(i64::MAX, i64::MIN, -1).unwrap();
        assert_eq!(cursor.len(), u64::MAX);
        assert_eq!(cursor.next(), Some(i64::MAX));

        let cursor = SequenceCursor::new(i64::MIN, i64::MAX, 2).unwrap();
        assert_eq!(cursor.len(), 1 << 63);
    }

    #[test]
    fn test_exhaustion_is_permanent() {
        let cursor = SequenceCursor::new(0, 1, 1).unwrap();
        assert_eq!(cursor.next(), Some(0));
        assert_eq!(cursor.next(), Some(1));
        for _ in 0..10 {
            assert_eq!(cursor.next(), None);
        }
        assert_eq!(cursor.issued(), 2);
    }

    #[test]
    fn test_extreme_bounds_do_not_overflow() {
        let cursor = SequenceCursor::new(i64::MAX - 2, i64::MAX, 2).unwrap();
        assert_eq!(cursor.iter().collect::<Vec<_>>(), vec![i64::MAX - 2, i64::MAX]);

        let cursor = SequenceCursor::new(i64::MIN, i64::MAX, i64::MAX).unwrap();
        assert_eq!(cursor.iter().collect::<Vec<_>>(), vec![i64::MIN, -1, i64::MAX - 1]);
    }

    #[test]
    fn test_chunks_cover_interval() {
        let cursor = SequenceCursor::new(0, 9, 1).unwrap().with_chunk_size(4).unwrap();
        let first = cursor.next_chunk().unwrap();
        assert_eq!((first.first(), first.end(), first.len()), (0, 3, 4));

        let second = cursor.next_chunk().unwrap();
        assert_eq!(second.into_iter().collect::<Vec<_>>(), vec![4, 5, 6, 7]);

        let last = cursor.next_chunk().unwrap();
        assert_eq!(last.iter().collect::<Vec<_>>(), vec![8, 9]);
        assert_eq!(cursor.next_chunk(), None);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let cursor = SequenceCursor::new(0, 9, 1).unwrap();
        assert!(cursor.with_chunk_size(0).is_err());
    }

    #[test]
    fn test_rewind() {
        let cursor = SequenceCursor::new(0, 2, 1).unwrap();
        assert_eq!(cursor.iter().count(), 3);
        cursor.rewind();
        assert_eq!(cursor.remaining(), 3);
        assert_eq!(cursor.next(), Some(0));
    }

    #[test]
    fn test_from_config() {
        let mut config = SequenceConfig::new(2, 20, 2);
        config.chunk_size = 5;
        let cursor = SequenceCursor::from_config(&config).unwrap();
        assert_eq!(cursor.bounds(), (2, 20, 2));
        assert_eq!(cursor.chunk_size(), 5);
        assert_eq!(cursor.next_chunk().unwrap().end(), 10);
    }

    #[test]
    fn test_clones_share_position() {
        let cursor = SequenceCursor::new(0, 5, 1).unwrap();
        let other = cursor.clone();
        assert_eq!(cursor.next(), Some(0));
        assert_eq!(other.next(), Some(1));
        assert_eq!(cursor.remaining(), 4);
    }
}
