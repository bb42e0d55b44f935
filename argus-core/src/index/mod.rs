//! Vector index interface and search results
//!
//! Index implementations are external collaborators; the core depends only
//! on this trait. [`FlatIndex`] is the in-tree exact-scan implementation
//! used by the in-memory segment and the test suite.

mod flat;

pub use flat::FlatIndex;

use std::io::Write;

use crate::error::{Error, Result};
use crate::plan::{Metric, SearchInfo};
use crate::structures::BitsetView;

/// Offset sentinel for unfilled result slots.
pub const INVALID_OFFSET: i64 = -1;

/// A dense vector index over one segment field.
///
/// `query` receives the visibility bitset as a non-owning view (set bit =
/// excluded row); the view is only valid for the duration of the call.
pub trait VectorIndex: Send + Sync {
    fn count(&self) -> usize;

    fn dim(&self) -> usize;

    fn metric(&self) -> Metric;

    /// Whether the index can reproduce the original vectors.
    fn has_raw_data(&self) -> bool;

    /// Top-k search for `nq` flattened query vectors.
    fn query(
        &self,
        queries: &[f32],
        nq: usize,
        info: &SearchInfo,
        bitset: BitsetView<'_>,
    ) -> Result<SearchResult>;

    /// Write the index to its binary file format.
    fn serialize(&self, writer: &mut dyn Write) -> Result<()>;
}

/// ANN search result: `total_nq × unity_top_k` slots, row-major per query,
/// best-first, padded with [`INVALID_OFFSET`] / the metric's worst distance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub total_nq: usize,
    pub unity_top_k: usize,
    pub offsets: Vec<i64>,
    pub distances: Vec<f32>,
}

impl SearchResult {
    /// Fully-padded result for a search that matched nothing.
    pub fn empty(nq: usize, info: &SearchInfo) -> Self {
        Self {
            total_nq: nq,
            unity_top_k: info.top_k,
            offsets: vec![INVALID_OFFSET; nq * info.top_k],
            distances: vec![info.metric.worst_distance(); nq * info.top_k],
        }
    }

    pub fn query_offsets(&self, query: usize) -> &[i64] {
        &self.offsets[query * self.unity_top_k..(query + 1) * self.unity_top_k]
    }

    pub fn query_distances(&self, query: usize) -> &[f32] {
        &self.distances[query * self.unity_top_k..(query + 1) * self.unity_top_k]
    }

    /// Round distances to `decimals` places; negative disables rounding.
    /// Padding slots are left untouched.
    pub fn round_distances(&mut self, decimals: i32) {
        if decimals < 0 {
            return;
        }
        let factor = 10f32.powi(decimals);
        for (distance, &offset) in self.distances.iter_mut().zip(&self.offsets) {
            if offset != INVALID_OFFSET {
                *distance = (*distance * factor).round() / factor;
            }
        }
    }

    /// Shift valid offsets by `base`, used when per-segment results are
    /// merged into engine-global row ids.
    pub fn translate_offsets(&mut self, base: i64) {
        for offset in &mut self.offsets {
            if *offset != INVALID_OFFSET {
                *offset += base;
            }
        }
    }

    /// Merge another result of the same shape into this one, keeping the
    /// best `unity_top_k` per query under `metric`.
    pub fn merge(&mut self, other: &SearchResult, metric: Metric) -> Result<()> {
        if self.total_nq != other.total_nq || self.unity_top_k != other.unity_top_k {
            return Err(Error::Unexpected(format!(
                "cannot merge search results of shape {}x{} and {}x{}",
                self.total_nq, self.unity_top_k, other.total_nq, other.unity_top_k
            )));
        }
        let k = self.unity_top_k;
        let mut offsets = Vec::with_capacity(self.offsets.len());
        let mut distances = Vec::with_capacity(self.distances.len());

        for q in 0..self.total_nq {
            let (lo, ld) = (self.query_offsets(q), self.query_distances(q));
            let (ro, rd) = (other.query_offsets(q), other.query_distances(q));
            let (mut i, mut j) = (0usize, 0usize);
            for _ in 0..k {
                let left_valid = i < k && lo[i] != INVALID_OFFSET;
                let right_valid = j < k && ro[j] != INVALID_OFFSET;
                match (left_valid, right_valid) {
                    (false, false) => {
                        offsets.push(INVALID_OFFSET);
                        distances.push(metric.worst_distance());
                    }
                    (true, false) => {
                        offsets.push(lo[i]);
                        distances.push(ld[i]);
                        i += 1;
                    }
                    (false, true) => {
                        offsets.push(ro[j]);
                        distances.push(rd[j]);
                        j += 1;
                    }
                    (true, true) => {
                        if metric.better(rd[j], ld[i]) {
                            offsets.push(ro[j]);
                            distances.push(rd[j]);
                            j += 1;
                        } else {
                            offsets.push(lo[i]);
                            distances.push(ld[i]);
                            i += 1;
                        }
                    }
                }
            }
        }

        self.offsets = offsets;
        self.distances = distances;
        Ok(())
    }
}
