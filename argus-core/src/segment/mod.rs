//! Read-side segment interface
//!
//! A segment is a contiguous, append-only shard of rows with stable
//! offsets. The plan executor needs more than the public read surface
//! ([`Segment`]): chunked scalar access, MVCC/delete masking, and vector
//! search. Those live on [`SegmentInternal`], a distinct trait the executor
//! accepts directly; there is no runtime probing from one to the other.

mod mem;

pub use mem::{MemSegment, MemSegmentBuilder};

use crate::error::Result;
use crate::index::SearchResult;
use crate::plan::{Literal, SearchInfo, SegmentSchema};
use crate::structures::{Bitset, BitsetView, ColumnChunk};
use crate::{FieldId, Timestamp};

/// Public read surface of a segment.
pub trait Segment: Send + Sync {
    fn row_count(&self) -> usize;

    fn schema(&self) -> &SegmentSchema;

    /// Number of rows visible to a reader at `ts`: the append-only prefix
    /// whose insert timestamps are `<= ts`.
    fn active_count(&self, ts: Timestamp) -> usize;
}

/// Executor surface of a segment.
///
/// Bitset polarity follows the visibility convention throughout: a set bit
/// means "row excluded", except where a method documents that the caller
/// has already flipped survivors to 1.
pub trait SegmentInternal: Segment {
    /// Rows per chunk; the last chunk may be short.
    fn chunk_size(&self) -> usize;

    fn num_chunks(&self) -> usize;

    fn chunk_rows(&self, chunk: usize) -> usize;

    /// Borrow one scalar column chunk for predicate evaluation.
    fn scalar_chunk(&self, field: FieldId, chunk: usize) -> Result<ColumnChunk<'_>>;

    /// Inverted scalar index for a field, when one was built.
    fn scalar_index(&self, field: FieldId) -> Option<&dyn ScalarIndexReader>;

    /// Set bit `i` when row `i`'s insert timestamp is greater than `ts`.
    fn mask_with_timestamps(&self, bitset: &mut Bitset, ts: Timestamp);

    /// Set bit `i` when row `i < n` carries a tombstone with ts' `<= ts`.
    fn mask_with_delete(&self, bitset: &mut Bitset, n: usize, ts: Timestamp);

    /// Finalize MVCC visibility on a survivor bitset (1 = visible): clears
    /// bits of rows inserted after `ts`.
    fn timestamp_filter(&self, bitset: &mut Bitset, ts: Timestamp);

    /// Offset fast path: re-check only `offsets` against `ts`, excluding
    /// (setting) rows inserted after it. The bitset keeps exclusion
    /// polarity here.
    fn timestamp_filter_offsets(&self, bitset: &mut Bitset, offsets: &[i64], ts: Timestamp);

    /// First `limit` surviving row offsets in ascending order; a negative
    /// limit means unbounded. `already_flipped` says whether survivors are
    /// the 1-bits (true) or the 0-bits (false).
    fn find_first(&self, limit: i64, bitset: &Bitset, already_flipped: bool) -> Result<Vec<i64>>;

    /// Delegate an ANN search to the segment's vector index. `bitset` is
    /// the exclusion view over the active rows.
    fn vector_search(
        &self,
        info: &SearchInfo,
        queries: &[f32],
        nq: usize,
        ts: Timestamp,
        bitset: BitsetView<'_>,
        out: &mut SearchResult,
    ) -> Result<()>;
}

/// Read surface of an inverted scalar index: maps term values to the
/// ascending row offsets that hold them.
pub trait ScalarIndexReader: Send + Sync {
    fn matching_offsets(&self, values: &[Literal]) -> Vec<i64>;
}
