//! Immutable in-memory segment
//!
//! The reference implementation of the segment traits: scalar columns with
//! optional validity, per-row insert timestamps, tombstones, an optional
//! dense vector field served by a [`FlatIndex`], and optional inverted
//! scalar indexes. Built once via [`MemSegmentBuilder`] and immutable
//! afterwards, so reads need no locking.

use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::index::{FlatIndex, SearchResult, VectorIndex};
use crate::plan::{DataType, Literal, Metric, SearchInfo, SegmentSchema};
use crate::structures::{Bitset, BitsetView, ColumnChunk, ScalarArray};
use crate::{FieldId, Timestamp};

use super::{ScalarIndexReader, Segment, SegmentInternal};

/// Default rows per evaluation chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// User field ids start here; lower ids are reserved for system columns.
const FIRST_FIELD_ID: FieldId = 100;

const DEFAULT_INSERT_TS: Timestamp = 1;

enum ColumnData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Str(Vec<String>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int8(v) => v.len(),
            ColumnData::Int16(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::Str(v) => v.len(),
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Int8(_) => DataType::Int8,
            ColumnData::Int16(_) => DataType::Int16,
            ColumnData::Int32(_) => DataType::Int32,
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::Float(_) => DataType::Float,
            ColumnData::Double(_) => DataType::Double,
            ColumnData::Str(_) => DataType::Str,
        }
    }

    fn slice(&self, lo: usize, hi: usize) -> ScalarArray<'_> {
        match self {
            ColumnData::Bool(v) => ScalarArray::Bool(&v[lo..hi]),
            ColumnData::Int8(v) => ScalarArray::Int8(&v[lo..hi]),
            ColumnData::Int16(v) => ScalarArray::Int16(&v[lo..hi]),
            ColumnData::Int32(v) => ScalarArray::Int32(&v[lo..hi]),
            ColumnData::Int64(v) => ScalarArray::Int64(&v[lo..hi]),
            ColumnData::Float(v) => ScalarArray::Float(&v[lo..hi]),
            ColumnData::Double(v) => ScalarArray::Double(&v[lo..hi]),
            ColumnData::Str(v) => ScalarArray::Str(&v[lo..hi]),
        }
    }

    fn term_key_at(&self, row: usize) -> TermKey {
        match self {
            ColumnData::Bool(v) => TermKey::Bool(v[row]),
            ColumnData::Int8(v) => TermKey::Int(v[row] as i64),
            ColumnData::Int16(v) => TermKey::Int(v[row] as i64),
            ColumnData::Int32(v) => TermKey::Int(v[row] as i64),
            ColumnData::Int64(v) => TermKey::Int(v[row]),
            ColumnData::Float(v) => TermKey::Float((v[row] as f64).to_bits()),
            ColumnData::Double(v) => TermKey::Float(v[row].to_bits()),
            ColumnData::Str(v) => TermKey::Str(v[row].clone()),
        }
    }
}

struct Column {
    data: ColumnData,
    validity: Option<Vec<bool>>,
}

/// Canonical hash key for inverted-index terms: integers widen to i64,
/// floats widen to f64 bits.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum TermKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

fn term_key(literal: &Literal) -> TermKey {
    match literal {
        Literal::Bool(v) => TermKey::Bool(*v),
        Literal::Int8(v) => TermKey::Int(*v as i64),
        Literal::Int16(v) => TermKey::Int(*v as i64),
        Literal::Int32(v) => TermKey::Int(*v as i64),
        Literal::Int64(v) => TermKey::Int(*v),
        Literal::Float(v) => TermKey::Float((*v as f64).to_bits()),
        Literal::Double(v) => TermKey::Float(v.to_bits()),
        Literal::Str(v) => TermKey::Str(v.clone()),
    }
}

struct MemScalarIndex {
    data_type: DataType,
    postings: FxHashMap<TermKey, Vec<i64>>,
}

impl MemScalarIndex {
    fn build(column: &Column) -> Self {
        let mut postings: FxHashMap<TermKey, Vec<i64>> = FxHashMap::default();
        for row in 0..column.data.len() {
            if let Some(validity) = &column.validity {
                if !validity[row] {
                    continue;
                }
            }
            postings
                .entry(column.data.term_key_at(row))
                .or_default()
                .push(row as i64);
        }
        Self {
            data_type: column.data.data_type(),
            postings,
        }
    }
}

impl ScalarIndexReader for MemScalarIndex {
    fn matching_offsets(&self, values: &[Literal]) -> Vec<i64> {
        let mut hits = Vec::new();
        for value in values {
            if let Some(cast) = value.cast_to(self.data_type) {
                if let Some(postings) = self.postings.get(&term_key(&cast)) {
                    hits.extend_from_slice(postings);
                }
            }
        }
        hits.sort_unstable();
        hits.dedup();
        hits
    }
}

/// Immutable in-memory segment.
pub struct MemSegment {
    schema: SegmentSchema,
    chunk_size: usize,
    row_count: usize,
    columns: FxHashMap<FieldId, Column>,
    scalar_indexes: FxHashMap<FieldId, MemScalarIndex>,
    /// Non-decreasing insert timestamps, one per row (append order).
    insert_timestamps: Vec<Timestamp>,
    tombstones: Vec<(usize, Timestamp)>,
    vector_field: Option<FieldId>,
    vector_index: Option<FlatIndex>,
    /// Per-field scalar chunk reads, for observing evaluation behavior.
    chunk_reads: FxHashMap<FieldId, AtomicU64>,
}

impl MemSegment {
    pub fn builder() -> MemSegmentBuilder {
        MemSegmentBuilder::new()
    }

    /// How many scalar chunks of `field` have been read so far.
    pub fn chunk_read_count(&self, field: FieldId) -> u64 {
        self.chunk_reads
            .get(&field)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn vector_field(&self) -> Option<FieldId> {
        self.vector_field
    }
}

impl Segment for MemSegment {
    fn row_count(&self) -> usize {
        self.row_count
    }

    fn schema(&self) -> &SegmentSchema {
        &self.schema
    }

    fn active_count(&self, ts: Timestamp) -> usize {
        self.insert_timestamps.partition_point(|&row_ts| row_ts <= ts)
    }
}

impl SegmentInternal for MemSegment {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn num_chunks(&self) -> usize {
        self.row_count.div_ceil(self.chunk_size)
    }

    fn chunk_rows(&self, chunk: usize) -> usize {
        let lo = chunk * self.chunk_size;
        self.row_count.saturating_sub(lo).min(self.chunk_size)
    }

    fn scalar_chunk(&self, field: FieldId, chunk: usize) -> Result<ColumnChunk<'_>> {
        let column = self
            .columns
            .get(&field)
            .ok_or_else(|| Error::Segment(format!("unknown scalar field {}", field)))?;
        let lo = chunk * self.chunk_size;
        let hi = (lo + self.chunk_size).min(self.row_count);
        if lo >= hi {
            return Err(Error::Segment(format!(
                "chunk {} out of range for segment of {} rows",
                chunk, self.row_count
            )));
        }
        if let Some(counter) = self.chunk_reads.get(&field) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        let values = column.data.slice(lo, hi);
        Ok(match &column.validity {
            Some(validity) => ColumnChunk::with_validity(values, &validity[lo..hi]),
            None => ColumnChunk::new(values),
        })
    }

    fn scalar_index(&self, field: FieldId) -> Option<&dyn ScalarIndexReader> {
        self.scalar_indexes
            .get(&field)
            .map(|index| index as &dyn ScalarIndexReader)
    }

    fn mask_with_timestamps(&self, bitset: &mut Bitset, ts: Timestamp) {
        let n = bitset.len().min(self.row_count);
        for row in 0..n {
            if self.insert_timestamps[row] > ts {
                bitset.set(row, true);
            }
        }
    }

    fn mask_with_delete(&self, bitset: &mut Bitset, n: usize, ts: Timestamp) {
        for &(row, delete_ts) in &self.tombstones {
            if delete_ts <= ts && row < n && row < bitset.len() {
                bitset.set(row, true);
            }
        }
    }

    fn timestamp_filter(&self, bitset: &mut Bitset, ts: Timestamp) {
        // survivor polarity: clear rows inserted after the query timestamp
        let n = bitset.len().min(self.row_count);
        for row in 0..n {
            if bitset.get(row) && self.insert_timestamps[row] > ts {
                bitset.set(row, false);
            }
        }
    }

    fn timestamp_filter_offsets(&self, bitset: &mut Bitset, offsets: &[i64], ts: Timestamp) {
        for &offset in offsets {
            let row = offset as usize;
            if row < bitset.len() && self.insert_timestamps[row] > ts {
                bitset.set(row, true);
            }
        }
    }

    fn find_first(&self, limit: i64, bitset: &Bitset, already_flipped: bool) -> Result<Vec<i64>> {
        let cap = if limit < 0 { usize::MAX } else { limit as usize };
        let mut offsets = Vec::new();
        for row in 0..bitset.len() {
            if offsets.len() >= cap {
                break;
            }
            if bitset.get(row) == already_flipped {
                offsets.push(row as i64);
            }
        }
        Ok(offsets)
    }

    fn vector_search(
        &self,
        info: &SearchInfo,
        queries: &[f32],
        nq: usize,
        _ts: Timestamp,
        bitset: BitsetView<'_>,
        out: &mut SearchResult,
    ) -> Result<()> {
        let index = self
            .vector_index
            .as_ref()
            .ok_or_else(|| Error::Segment("segment has no vector index".into()))?;
        *out = index.query(queries, nq, info, bitset)?;
        Ok(())
    }
}

/// Column-at-a-time builder for [`MemSegment`].
pub struct MemSegmentBuilder {
    chunk_size: usize,
    next_field: FieldId,
    schema: SegmentSchema,
    columns: FxHashMap<FieldId, Column>,
    indexed_fields: Vec<FieldId>,
    insert_timestamps: Option<Vec<Timestamp>>,
    tombstones: Vec<(usize, Timestamp)>,
    vector: Option<(FieldId, usize, Metric, Vec<f32>)>,
}

macro_rules! add_column_fn {
    ($fn_name:ident, $ty:ty, $variant:ident) => {
        pub fn $fn_name(&mut self, name: &str, values: Vec<$ty>) -> FieldId {
            self.add_column(name, ColumnData::$variant(values))
        }
    };
}

impl MemSegmentBuilder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            next_field: FIRST_FIELD_ID,
            schema: SegmentSchema::default(),
            columns: FxHashMap::default(),
            indexed_fields: Vec::new(),
            insert_timestamps: None,
            tombstones: Vec::new(),
            vector: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        self.chunk_size = chunk_size;
        self
    }

    fn add_column(&mut self, name: &str, data: ColumnData) -> FieldId {
        let field = self.next_field;
        self.next_field += 1;
        self.schema.add_field(field, name, data.data_type());
        self.columns.insert(
            field,
            Column {
                data,
                validity: None,
            },
        );
        field
    }

    add_column_fn!(add_bool_column, bool, Bool);
    add_column_fn!(add_int8_column, i8, Int8);
    add_column_fn!(add_int16_column, i16, Int16);
    add_column_fn!(add_int32_column, i32, Int32);
    add_column_fn!(add_int64_column, i64, Int64);
    add_column_fn!(add_float_column, f32, Float);
    add_column_fn!(add_double_column, f64, Double);
    add_column_fn!(add_string_column, String, Str);

    /// Attach a validity map to a column (`false` = missing value).
    pub fn set_validity(&mut self, field: FieldId, validity: Vec<bool>) {
        if let Some(column) = self.columns.get_mut(&field) {
            column.validity = Some(validity);
        }
    }

    /// Build an inverted scalar index for the field at segment build time.
    pub fn with_scalar_index(mut self, field: FieldId) -> Self {
        self.indexed_fields.push(field);
        self
    }

    /// Per-row insert timestamps (append order, non-decreasing). Defaults
    /// to 1 for every row.
    pub fn with_insert_timestamps(mut self, timestamps: Vec<Timestamp>) -> Self {
        self.insert_timestamps = Some(timestamps);
        self
    }

    /// Record a tombstone for `row` at `ts`.
    pub fn delete(mut self, row: usize, ts: Timestamp) -> Self {
        self.tombstones.push((row, ts));
        self
    }

    /// One dense f32 vector column, row-major, served by a flat index.
    pub fn add_vector_column(
        &mut self,
        name: &str,
        dim: usize,
        metric: Metric,
        data: Vec<f32>,
    ) -> FieldId {
        let field = self.next_field;
        self.next_field += 1;
        self.schema.add_field(field, name, DataType::Float);
        self.vector = Some((field, dim, metric, data));
        field
    }

    pub fn build(self) -> Result<MemSegment> {
        let mut row_count: Option<usize> = None;
        for column in self.columns.values() {
            let len = column.data.len();
            match row_count {
                None => row_count = Some(len),
                Some(existing) if existing != len => {
                    return Err(Error::Segment(format!(
                        "column length mismatch: {} vs {}",
                        existing, len
                    )));
                }
                _ => {}
            }
            if let Some(validity) = &column.validity {
                if validity.len() != len {
                    return Err(Error::Segment("validity length mismatch".into()));
                }
            }
        }
        let vector_rows = self
            .vector
            .as_ref()
            .map(|(_, dim, _, data)| {
                if *dim == 0 || data.len() % dim != 0 {
                    Err(Error::Segment("vector column shape mismatch".into()))
                } else {
                    Ok(data.len() / dim)
                }
            })
            .transpose()?;
        if let (Some(rows), Some(vec_rows)) = (row_count, vector_rows) {
            if rows != vec_rows {
                return Err(Error::Segment(format!(
                    "vector column has {} rows, scalar columns have {}",
                    vec_rows, rows
                )));
            }
        }
        let row_count = row_count.or(vector_rows).unwrap_or(0);

        let insert_timestamps = match self.insert_timestamps {
            Some(timestamps) => {
                if timestamps.len() != row_count {
                    return Err(Error::Segment("insert timestamp length mismatch".into()));
                }
                if timestamps.windows(2).any(|w| w[0] > w[1]) {
                    return Err(Error::Segment(
                        "insert timestamps must be non-decreasing".into(),
                    ));
                }
                timestamps
            }
            None => vec![DEFAULT_INSERT_TS; row_count],
        };

        for &(row, _) in &self.tombstones {
            if row >= row_count {
                return Err(Error::Segment(format!(
                    "tombstone row {} out of range ({} rows)",
                    row, row_count
                )));
            }
        }

        let mut scalar_indexes = FxHashMap::default();
        for field in &self.indexed_fields {
            let column = self
                .columns
                .get(field)
                .ok_or_else(|| Error::Segment(format!("cannot index unknown field {}", field)))?;
            scalar_indexes.insert(*field, MemScalarIndex::build(column));
        }

        let (vector_field, vector_index) = match self.vector {
            Some((field, dim, metric, data)) => {
                (Some(field), Some(FlatIndex::build(dim, metric, data)?))
            }
            None => (None, None),
        };

        let chunk_reads = self
            .columns
            .keys()
            .map(|&field| (field, AtomicU64::new(0)))
            .collect();

        Ok(MemSegment {
            schema: self.schema,
            chunk_size: self.chunk_size,
            row_count,
            columns: self.columns,
            scalar_indexes,
            insert_timestamps,
            tombstones: self.tombstones,
            vector_field,
            vector_index,
            chunk_reads,
        })
    }
}

impl Default for MemSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_segment() -> MemSegment {
        let mut builder = MemSegment::builder().with_chunk_size(4);
        builder.add_int64_column("age", vec![10, 20, 30, 40, 50, 60]);
        builder
            .with_insert_timestamps(vec![1, 2, 3, 4, 5, 6])
            .build()
            .unwrap()
    }

    #[test]
    fn test_active_count_partitions_on_ts() {
        let segment = small_segment();
        assert_eq!(segment.active_count(0), 0);
        assert_eq!(segment.active_count(3), 3);
        assert_eq!(segment.active_count(100), 6);
    }

    #[test]
    fn test_chunking() {
        let segment = small_segment();
        assert_eq!(segment.num_chunks(), 2);
        assert_eq!(segment.chunk_rows(0), 4);
        assert_eq!(segment.chunk_rows(1), 2);

        let field = segment.schema().fields()[0].id;
        let chunk = segment.scalar_chunk(field, 1).unwrap();
        assert_eq!(chunk.len(), 2);
        assert!(segment.scalar_chunk(field, 2).is_err());
        assert_eq!(segment.chunk_read_count(field), 1);
    }

    #[test]
    fn test_mask_with_timestamps() {
        let segment = small_segment();
        let mut bitset = Bitset::zeroes(6);
        segment.mask_with_timestamps(&mut bitset, 4);
        // rows 4 and 5 were inserted after ts=4
        assert!(!bitset.get(3));
        assert!(bitset.get(4));
        assert!(bitset.get(5));
    }

    #[test]
    fn test_mask_with_delete_respects_ts() {
        let mut builder = MemSegment::builder();
        builder.add_int64_column("x", vec![0, 1, 2]);
        let segment = builder.delete(1, 5).delete(2, 50).build().unwrap();

        let mut bitset = Bitset::zeroes(3);
        segment.mask_with_delete(&mut bitset, 3, 10);
        assert!(!bitset.get(0));
        assert!(bitset.get(1));
        // tombstone at ts=50 is not yet visible at ts=10
        assert!(!bitset.get(2));
    }

    #[test]
    fn test_find_first_polarities() {
        let segment = small_segment();
        let mut bitset = Bitset::zeroes(6);
        bitset.set(1, true);
        bitset.set(3, true);

        // exclusion polarity: survivors are the zero bits
        let offsets = segment.find_first(-1, &bitset, false).unwrap();
        assert_eq!(offsets, vec![0, 2, 4, 5]);

        // flipped polarity: survivors are the one bits
        let offsets = segment.find_first(-1, &bitset, true).unwrap();
        assert_eq!(offsets, vec![1, 3]);

        let offsets = segment.find_first(2, &bitset, false).unwrap();
        assert_eq!(offsets, vec![0, 2]);
    }

    #[test]
    fn test_scalar_index_offsets() {
        let mut builder = MemSegment::builder();
        let x = builder.add_int32_column("x", vec![7, 3, 7, 9, 7]);
        let segment = builder.with_scalar_index(x).build().unwrap();

        let index = segment.scalar_index(x).unwrap();
        assert_eq!(index.matching_offsets(&[Literal::Int64(7)]), vec![0, 2, 4]);
        assert_eq!(
            index.matching_offsets(&[Literal::Int32(3), Literal::Int32(9)]),
            vec![1, 3]
        );
        assert!(index.matching_offsets(&[Literal::Int32(42)]).is_empty());
        // non-coercible probes match nothing
        assert!(index.matching_offsets(&[Literal::Str("7".into())]).is_empty());
    }

    #[test]
    fn test_builder_rejects_mismatched_columns() {
        let mut builder = MemSegment::builder();
        builder.add_int64_column("a", vec![1, 2, 3]);
        builder.add_int64_column("b", vec![1, 2]);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_builder_rejects_unsorted_timestamps() {
        let mut builder = MemSegment::builder();
        builder.add_int64_column("a", vec![1, 2, 3]);
        assert!(builder
            .with_insert_timestamps(vec![3, 2, 1])
            .build()
            .is_err());
    }

    #[test]
    fn test_vector_search_through_segment() {
        let mut builder = MemSegment::builder();
        builder.add_vector_column(
            "embedding",
            2,
            Metric::L2,
            vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        );
        let segment = builder.build().unwrap();
        assert_eq!(segment.row_count(), 3);

        let info = SearchInfo::new(1, Metric::L2);
        let bitset = Bitset::zeroes(3);
        let mut out = SearchResult::default();
        segment
            .vector_search(&info, &[0.9, 0.0], 1, 100, bitset.view(), &mut out)
            .unwrap();
        assert_eq!(out.query_offsets(0), &[1]);
    }
}
