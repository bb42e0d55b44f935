//! Filter pipeline task
//!
//! A [`FilterTask`] drives a compiled predicate over a segment one chunk
//! per [`FilterTask::next`] call, in ascending row-offset order, bounded to
//! the rows active at the query timestamp. The task is single-thread
//! affine: it takes `&mut self` and must not be advanced concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::Timestamp;
use crate::error::{Error, Result};
use crate::plan::{Expr, Literal};
use crate::segment::{Segment, SegmentInternal};
use crate::structures::{ColumnVector, RowVector};

use super::expression::{CompiledExpr, compile, eval_chunk};

/// Per-query evaluation context carried by every task of a job.
#[derive(Debug, Clone)]
pub struct EvalCtx {
    pub timestamp: Timestamp,
    pub query_id: u64,
    /// Job deadline; checked between chunks.
    pub deadline: Option<Instant>,
    /// Cooperative cancellation token shared across a job's tasks.
    pub cancel: Arc<AtomicBool>,
}

impl EvalCtx {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            query_id: 0,
            deadline: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_query_id(mut self, query_id: u64) -> Self {
        self.query_id = query_id;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fails when the job was cancelled or its deadline elapsed.
    pub fn check(&self) -> Result<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

/// Root term predicates over an indexed field answer from the inverted
/// index in a single step, emitting hit offsets alongside the flags.
struct IndexedTerm {
    field: crate::FieldId,
    values: Vec<Literal>,
}

/// Chunk-by-chunk filter evaluation over one segment.
///
/// Offsets can only be materialized by the first produced chunk (the
/// inverted-index path answers for the whole segment at once); subsequent
/// chunks never carry offsets. The iterator is not re-entrant: once
/// exhausted it stays exhausted.
pub struct FilterTask<'a> {
    segment: &'a dyn SegmentInternal,
    ctx: &'a EvalCtx,
    expr: CompiledExpr,
    indexed: Option<IndexedTerm>,
    /// Rows active at the query timestamp; evaluation never looks past it.
    row_bound: usize,
    next_chunk: usize,
    rows_produced: usize,
    done: bool,
}

impl<'a> FilterTask<'a> {
    /// Compile `expr` against the segment schema and set up iteration over
    /// the first `row_bound` rows. Typing errors surface here, before any
    /// chunk work.
    pub fn new(
        expr: &Expr,
        segment: &'a dyn SegmentInternal,
        ctx: &'a EvalCtx,
        row_bound: usize,
    ) -> Result<Self> {
        let compiled = compile(expr, segment.schema())?;
        let indexed = match expr {
            Expr::Term { field, values } if segment.scalar_index(*field).is_some() => {
                Some(IndexedTerm {
                    field: *field,
                    values: values.clone(),
                })
            }
            _ => None,
        };
        Ok(Self {
            segment,
            ctx,
            expr: compiled,
            indexed,
            row_bound,
            next_chunk: 0,
            rows_produced: 0,
            done: false,
        })
    }

    /// Evaluate the next chunk; `None` when exhausted.
    pub fn next(&mut self) -> Result<Option<RowVector>> {
        if self.done || self.rows_produced >= self.row_bound {
            self.done = true;
            return Ok(None);
        }
        self.ctx.check()?;

        if let Some(indexed) = &self.indexed {
            // one shot: flags for every active row plus the hit offsets
            self.done = true;
            let index = self
                .segment
                .scalar_index(indexed.field)
                .ok_or_else(|| Error::Unexpected("scalar index vanished".into()))?;
            let hits = index.matching_offsets(&indexed.values);
            let mut flags = vec![false; self.row_bound];
            let mut offsets = Vec::with_capacity(hits.len());
            for &offset in &hits {
                if (offset as usize) < self.row_bound {
                    flags[offset as usize] = true;
                    offsets.push(offset);
                }
            }
            self.rows_produced = self.row_bound;
            return Ok(Some(RowVector::BoolWithOffsets {
                flags: ColumnVector::new(flags),
                offsets: ColumnVector::new(offsets),
            }));
        }

        if self.next_chunk >= self.segment.num_chunks() {
            self.done = true;
            return Ok(None);
        }

        let chunk = self.next_chunk;
        self.next_chunk += 1;
        let mut values = eval_chunk(&self.expr, self.segment, chunk)?.into_inner();

        // the last chunk may reach past the active prefix
        let remaining = self.row_bound - self.rows_produced;
        if values.len() > remaining {
            values.truncate(remaining);
        }
        self.rows_produced += values.len();
        Ok(Some(RowVector::Bool(ColumnVector::new(values))))
    }
}
