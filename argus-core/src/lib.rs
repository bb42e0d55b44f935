//! Argus - query execution and resource scheduling core for a vector
//! similarity search engine
//!
//! The core answers two query shapes over immutable segments of
//! high-dimensional vectors with associated scalar fields:
//! - **ANN search**: top-k nearest neighbors under a metric, optionally
//!   restricted by a scalar predicate
//! - **Retrieve**: row offsets (or a count) matching a predicate, under
//!   MVCC snapshot visibility
//!
//! Predicates compile into chunk-by-chunk evaluators producing visibility
//! bitsets, with SIMD boolean kernels dispatched once at process start.
//! Work is scheduled across a typed resource graph (disk / cpu / gpu)
//! with bandwidth-weighted links, one loader and executor per resource.

pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod index;
pub mod plan;
pub mod sched;
pub mod segment;
pub mod storage;
pub mod structures;

// Re-exports from config / engine
pub use config::EngineConfig;
pub use engine::Engine;

// Re-exports from error
pub use error::{Error, Result};

// Re-exports from exec
pub use exec::{
    EvalCtx, FilterTask, RetrieveResult, execute_retrieve_plan, execute_vector_plan,
};

// Re-exports from index
pub use index::{FlatIndex, INVALID_OFFSET, SearchResult, VectorIndex};

// Re-exports from plan
pub use plan::{
    CompareOp, DataType, Expr, FieldSchema, Literal, Metric, PlaceholderGroup, RetrievePlan,
    SearchInfo, SegmentSchema, VectorPlan,
};

// Re-exports from sched
pub use sched::{JobHandle, JobManager, JobOutcome, JobRequest, ResourceKind, Scheduler};

// Re-exports from segment
pub use segment::{MemSegment, MemSegmentBuilder, ScalarIndexReader, Segment, SegmentInternal};

// Re-exports from storage
pub use storage::{FileManager, FileManagerContext, IndexMeta, LocalFileManager};

// Re-exports from structures
pub use structures::{Bitset, BitsetView, ColumnChunk, ColumnVector, RowVector, ScalarArray};

/// Scalar field identifier within a segment schema.
pub type FieldId = u32;

/// 64-bit MVCC commit clock. A query at `ts` sees rows inserted at or
/// before `ts` and not tombstoned at or before it.
pub type Timestamp = u64;
