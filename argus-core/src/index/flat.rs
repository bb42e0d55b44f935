//! Flat (exact-scan) vector index
//!
//! Brute-force top-k over row-major f32 data for every supported metric.
//! Binary metrics (Hamming, Jaccard) binarize the input at build time with
//! a 0.5 threshold. The on-disk format is a small little-endian codec that
//! always carries the raw vectors (`has_raw_data` is true).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::plan::{Metric, SearchInfo};
use crate::structures::BitsetView;

use super::{INVALID_OFFSET, SearchResult, VectorIndex};

const INDEX_MAGIC: &[u8; 4] = b"AIDX";
const INDEX_VERSION: u32 = 1;

/// Exact-scan index over one dense f32 vector field.
pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    data: Vec<f32>,
    /// Per-row L2 norms, precomputed for cosine.
    norms: Option<Vec<f32>>,
    /// Bit-packed rows for Hamming/Jaccard, `words_per_row` words each.
    bits: Option<Vec<u64>>,
    words_per_row: usize,
}

impl FlatIndex {
    /// Build from row-major data; `data.len()` must be a multiple of `dim`.
    pub fn build(dim: usize, metric: Metric, data: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Index("vector dim must be positive".into()));
        }
        if data.len() % dim != 0 {
            return Err(Error::Index(format!(
                "vector data length {} is not a multiple of dim {}",
                data.len(),
                dim
            )));
        }
        let count = data.len() / dim;

        let norms = match metric {
            Metric::Cosine => Some(
                (0..count)
                    .map(|row| {
                        let v = &data[row * dim..(row + 1) * dim];
                        v.iter().map(|x| x * x).sum::<f32>().sqrt()
                    })
                    .collect(),
            ),
            _ => None,
        };

        let words_per_row = dim.div_ceil(64);
        let bits = match metric {
            Metric::Hamming | Metric::Jaccard => {
                let mut packed = vec![0u64; count * words_per_row];
                for row in 0..count {
                    for (i, &x) in data[row * dim..(row + 1) * dim].iter().enumerate() {
                        if x >= 0.5 {
                            packed[row * words_per_row + i / 64] |= 1u64 << (i % 64);
                        }
                    }
                }
                Some(packed)
            }
            _ => None,
        };

        Ok(Self {
            dim,
            metric,
            data,
            norms,
            bits,
            words_per_row,
        })
    }

    /// Read an index back from its binary format.
    pub fn load(reader: &mut dyn Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(Error::Index("bad index file magic".into()));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(Error::Index(format!(
                "unsupported index version {}",
                version
            )));
        }
        let metric = match reader.read_u8()? {
            0 => Metric::L2,
            1 => Metric::Ip,
            2 => Metric::Cosine,
            3 => Metric::Hamming,
            4 => Metric::Jaccard,
            other => {
                return Err(Error::Index(format!("unknown metric tag {}", other)));
            }
        };
        let dim = reader.read_u32::<LittleEndian>()? as usize;
        let count = reader.read_u64::<LittleEndian>()? as usize;
        let mut data = vec![0f32; count * dim];
        reader.read_f32_into::<LittleEndian>(&mut data)?;
        Self::build(dim, metric, data)
    }

    fn metric_tag(&self) -> u8 {
        match self.metric {
            Metric::L2 => 0,
            Metric::Ip => 1,
            Metric::Cosine => 2,
            Metric::Hamming => 3,
            Metric::Jaccard => 4,
        }
    }

    #[inline]
    fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.dim..(row + 1) * self.dim]
    }

    #[inline]
    fn row_bits(&self, row: usize) -> &[u64] {
        let bits = self.bits.as_ref().expect("binary metric without packed rows");
        &bits[row * self.words_per_row..(row + 1) * self.words_per_row]
    }

    /// Raw distance/similarity between a query and one stored row.
    fn distance(&self, query: &[f32], query_bits: &[u64], query_norm: f32, row: usize) -> f32 {
        match self.metric {
            Metric::L2 => self
                .row(row)
                .iter()
                .zip(query)
                .map(|(a, b)| (a - b) * (a - b))
                .sum(),
            Metric::Ip => self.row(row).iter().zip(query).map(|(a, b)| a * b).sum(),
            Metric::Cosine => {
                let dot: f32 = self.row(row).iter().zip(query).map(|(a, b)| a * b).sum();
                let norm = self.norms.as_ref().expect("cosine without norms")[row];
                if norm == 0.0 || query_norm == 0.0 {
                    0.0
                } else {
                    dot / (norm * query_norm)
                }
            }
            Metric::Hamming => {
                let row_bits = self.row_bits(row);
                row_bits
                    .iter()
                    .zip(query_bits)
                    .map(|(a, b)| (a ^ b).count_ones())
                    .sum::<u32>() as f32
            }
            Metric::Jaccard => {
                let row_bits = self.row_bits(row);
                let mut inter = 0u32;
                let mut union = 0u32;
                for (a, b) in row_bits.iter().zip(query_bits) {
                    inter += (a & b).count_ones();
                    union += (a | b).count_ones();
                }
                if union == 0 {
                    0.0
                } else {
                    1.0 - inter as f32 / union as f32
                }
            }
        }
    }
}

/// Heap entry normalized so a larger key is a better hit. Ordering breaks
/// ties toward lower offsets so the discard candidate is deterministic.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    key: f32,
    offset: i64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .partial_cmp(&other.key)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.offset.cmp(&self.offset))
    }
}

impl VectorIndex for FlatIndex {
    fn count(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn has_raw_data(&self) -> bool {
        true
    }

    fn query(
        &self,
        queries: &[f32],
        nq: usize,
        info: &SearchInfo,
        bitset: BitsetView<'_>,
    ) -> Result<SearchResult> {
        if queries.len() != nq * self.dim {
            return Err(Error::Index(format!(
                "query blob has {} floats, expected {} ({}x{})",
                queries.len(),
                nq * self.dim,
                nq,
                self.dim
            )));
        }
        let count = self.count();
        if !bitset.is_empty() && bitset.len() > count {
            return Err(Error::Index(format!(
                "bitset covers {} rows but index has {}",
                bitset.len(),
                count
            )));
        }
        // an empty view means no exclusions; otherwise it bounds the scan
        let scan = if bitset.is_empty() { count } else { bitset.len() };
        let k = info.top_k;
        let similarity = self.metric.is_similarity();

        let mut result = SearchResult::empty(nq, info);

        for q in 0..nq {
            let query = &queries[q * self.dim..(q + 1) * self.dim];
            let query_norm = match self.metric {
                Metric::Cosine => query.iter().map(|x| x * x).sum::<f32>().sqrt(),
                _ => 0.0,
            };
            let query_bits = match self.metric {
                Metric::Hamming | Metric::Jaccard => {
                    let mut packed = vec![0u64; self.words_per_row];
                    for (i, &x) in query.iter().enumerate() {
                        if x >= 0.5 {
                            packed[i / 64] |= 1u64 << (i % 64);
                        }
                    }
                    packed
                }
                _ => Vec::new(),
            };

            // min-heap on the normalized key: peek() is the worst kept hit
            let mut heap: BinaryHeap<std::cmp::Reverse<HeapEntry>> =
                BinaryHeap::with_capacity(k + 1);
            for row in 0..scan {
                if !bitset.is_empty() && bitset.get(row) {
                    continue;
                }
                let raw = self.distance(query, &query_bits, query_norm, row);
                let key = if similarity { raw } else { -raw };
                let entry = HeapEntry {
                    key,
                    offset: row as i64,
                };
                if heap.len() < k {
                    heap.push(std::cmp::Reverse(entry));
                } else if let Some(worst) = heap.peek() {
                    if entry > worst.0 {
                        heap.pop();
                        heap.push(std::cmp::Reverse(entry));
                    }
                }
            }

            let mut hits: Vec<HeapEntry> = heap.into_iter().map(|r| r.0).collect();
            hits.sort_by(|a, b| b.cmp(a));
            let base = q * k;
            for (slot, hit) in hits.iter().enumerate() {
                result.offsets[base + slot] = hit.offset;
                result.distances[base + slot] = if similarity { hit.key } else { -hit.key };
            }
        }

        Ok(result)
    }

    fn serialize(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(INDEX_MAGIC)?;
        writer.write_u32::<LittleEndian>(INDEX_VERSION)?;
        writer.write_u8(self.metric_tag())?;
        writer.write_u32::<LittleEndian>(self.dim as u32)?;
        writer.write_u64::<LittleEndian>(self.count() as u64)?;
        for &x in &self.data {
            writer.write_f32::<LittleEndian>(x)?;
        }
        Ok(())
    }
}
