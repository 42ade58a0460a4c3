//! Static range partitioning
//!
//! Splits a half-open index range `[low, high)` into at most `num_threads`
//! contiguous chunks. The chunk count is clamped to the number of indices so
//! no worker is ever handed an empty chunk. When the range does not divide
//! evenly the first `range % chunks` chunks get one extra index.
//!
//! # Example
//!
//! ```
//! use parfor::{partition, Chunk};
//!
//! let plan = partition(0, 10, 3).unwrap();
//! assert_eq!(plan.sizes(), vec![4, 3, 3]);
//! assert_eq!(plan.chunks[0], Chunk { start: 0, end: 4 });
//! ```

use crate::error::{Dimension, ForError};
use tracing::trace;

/// A contiguous block of indices `[start, end)` assigned to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub start: i64,
    pub end: i64,
}

impl Chunk {
    /// Returns the number of indices in this chunk
    pub fn len(&self) -> u64 {
        self.end.abs_diff(self.start)
    }

    /// Returns true if this chunk has no indices
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns the indices of this chunk in increasing order
    pub fn indices(&self) -> std::ops::Range<i64> {
        self.start..self.end
    }
}

/// A chunk of a two-dimensional loop
///
/// Only the outer bounds differ between the chunks of one plan; every chunk
/// carries the full inner range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridChunk {
    pub outer: Chunk,
    pub inner: Chunk,
}

impl GridChunk {
    /// Returns the number of `(i, j)` pairs in this chunk
    pub fn len(&self) -> u128 {
        u128::from(self.outer.len()) * u128::from(self.inner.len())
    }

    /// Returns true if this chunk has no pairs
    pub fn is_empty(&self) -> bool {
        self.outer.is_empty() || self.inner.is_empty()
    }

    /// Returns the `(i, j)` pairs of this chunk, `j` varying fastest
    pub fn pairs(&self) -> impl Iterator<Item = (i64, i64)> {
        let inner = self.inner;
        self.outer
            .indices()
            .flat_map(move |i| inner.indices().map(move |j| (i, j)))
    }
}

/// The chunks covering one range, in increasing order of `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Inclusive lower bound of the partitioned range
    pub low: i64,

    /// Exclusive upper bound of the partitioned range
    pub high: i64,

    /// The individual chunks
    pub chunks: Vec<Chunk>,
}

impl ChunkPlan {
    fn empty(low: i64, high: i64) -> Self {
        Self {
            low,
            high,
            chunks: Vec::new(),
        }
    }

    /// Returns the number of chunks (and so the number of workers)
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if the plan schedules no work at all
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the size of every chunk, in order
    pub fn sizes(&self) -> Vec<u64> {
        self.chunks.iter().map(Chunk::len).collect()
    }

    /// Returns an iterator over the chunks
    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    /// Verify that the chunks tile `[low, high)` with no gaps or overlaps
    #[cfg(test)]
    pub(crate) fn verify_coverage(&self) -> bool {
        let mut next = self.low;
        for chunk in &self.chunks {
            if chunk.start != next || chunk.is_empty() {
                return false;
            }
            next = chunk.end;
        }
        next == self.high
    }
}

impl<'a> IntoIterator for &'a ChunkPlan {
    type Item = &'a Chunk;
    type IntoIter = std::slice::Iter<'a, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The chunks of a two-dimensional loop
///
/// `outer` is the partition of the outer range, exactly as [`partition`]
/// builds it. If the inner range is empty there is nothing to do and
/// `chunks` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPlan {
    pub outer: ChunkPlan,
    pub inner: Chunk,
    pub chunks: Vec<GridChunk>,
}

impl GridPlan {
    /// Returns the number of chunks (and so the number of workers)
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if the plan schedules no work at all
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the total number of `(i, j)` pairs covered by the plan
    pub fn total_pairs(&self) -> u128 {
        self.chunks.iter().map(GridChunk::len).sum()
    }

    /// Returns an iterator over the chunks
    pub fn iter(&self) -> std::slice::Iter<'_, GridChunk> {
        self.chunks.iter()
    }
}

impl<'a> IntoIterator for &'a GridPlan {
    type Item = &'a GridChunk;
    type IntoIter = std::slice::Iter<'a, GridChunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn validate_range(dimension: Dimension, low: i64, high: i64) -> Result<(), ForError> {
    if high < low {
        return Err(ForError::InvalidRange {
            dimension,
            low,
            high,
        });
    }
    Ok(())
}

fn validate_threads(num_threads: usize) -> Result<(), ForError> {
    if num_threads == 0 {
        return Err(ForError::InvalidThreadCount(num_threads));
    }
    Ok(())
}

/// Create contiguous chunks covering `[low, high)`, `low < high`
fn create_chunks(low: i64, high: i64, num_threads: usize) -> Vec<Chunk> {
    let range = high.abs_diff(low);
    // Bounded by the thread count, so it fits back into usize.
    let count = range.min(num_threads as u64) as usize;
    let base = range / count as u64;
    let remainder = range % count as u64;

    let mut chunks = Vec::with_capacity(count);
    let mut start = low;
    for i in 0..count as u64 {
        let size = if i < remainder { base + 1 } else { base };
        let end = start.wrapping_add_unsigned(size);
        chunks.push(Chunk { start, end });
        start = end;
    }

    chunks
}

/// Partition `[low, high)` into contiguous chunks for `num_threads` workers
///
/// Produces exactly `min(num_threads, high - low)` chunks. An empty range
/// produces an empty plan.
///
/// # Errors
///
/// * [`ForError::InvalidThreadCount`] if `num_threads` is 0
/// * [`ForError::InvalidRange`] if `high < low`
///
/// # Example
///
/// ```
/// use parfor::partition;
///
/// // More threads than indices: one index per chunk
/// let plan = partition(0, 3, 10).unwrap();
/// assert_eq!(plan.sizes(), vec![1, 1, 1]);
///
/// // Empty range: nothing to do
/// assert!(partition(5, 5, 4).unwrap().is_empty());
/// ```
pub fn partition(low: i64, high: i64, num_threads: usize) -> Result<ChunkPlan, ForError> {
    validate_threads(num_threads)?;
    validate_range(Dimension::Outer, low, high)?;

    if low == high {
        return Ok(ChunkPlan::empty(low, high));
    }

    let chunks = create_chunks(low, high, num_threads);
    trace!(low, high, num_threads, chunks = chunks.len(), "partitioned range");

    Ok(ChunkPlan { low, high, chunks })
}

/// Partition the outer range of a two-dimensional loop
///
/// The outer range `[low1, high1)` is split exactly as [`partition`] would;
/// the inner range `[low2, high2)` is copied whole into every chunk.
///
/// # Errors
///
/// * [`ForError::InvalidThreadCount`] if `num_threads` is 0
/// * [`ForError::InvalidRange`] if either range has `high < low`
pub fn partition_2d(
    low1: i64,
    high1: i64,
    low2: i64,
    high2: i64,
    num_threads: usize,
) -> Result<GridPlan, ForError> {
    validate_threads(num_threads)?;
    validate_range(Dimension::Outer, low1, high1)?;
    validate_range(Dimension::Inner, low2, high2)?;

    let inner = Chunk {
        start: low2,
        end: high2,
    };
    let outer = partition(low1, high1, num_threads)?;

    // An empty inner range leaves every worker idle, so none is scheduled.
    let chunks = if inner.is_empty() {
        Vec::new()
    } else {
        outer
            .iter()
            .map(|&outer| GridChunk { outer, inner })
            .collect()
    };

    Ok(GridPlan {
        outer,
        inner,
        chunks,
    })
}
