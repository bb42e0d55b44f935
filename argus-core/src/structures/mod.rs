//! Core data structures: visibility bitsets, column vectors, SIMD kernels

mod bitset;
mod column;
pub mod simd;

pub use bitset::{Bitset, BitsetView};
pub use column::{ColumnChunk, ColumnVector, RowVector, ScalarArray};
