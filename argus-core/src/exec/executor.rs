//! Plan executor
//!
//! Composes the filter bitset with MVCC and deletion masks, then hands off
//! to the segment's vector index (ANN path) or scans out surviving offsets
//! (retrieve path). Results come back by value; the executor holds no
//! state between plans.

use crate::error::{Error, Result};
use crate::index::SearchResult;
use crate::plan::{PlaceholderGroup, RetrievePlan, VectorPlan};
use crate::segment::{Segment, SegmentInternal};
use crate::structures::{Bitset, RowVector};

use super::filter::{EvalCtx, FilterTask};

/// Result of a retrieve plan: surviving row offsets, or a single count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieveResult {
    Offsets(Vec<i64>),
    Count(i64),
}

impl RetrieveResult {
    pub fn offsets(&self) -> &[i64] {
        match self {
            RetrieveResult::Offsets(offsets) => offsets,
            RetrieveResult::Count(_) => &[],
        }
    }

    pub fn count(&self) -> Option<i64> {
        match self {
            RetrieveResult::Count(count) => Some(*count),
            RetrieveResult::Offsets(_) => None,
        }
    }
}

/// Drive a filter task to completion, accumulating chunk flags into a
/// match bitset (1 = predicate matched) and capturing materialized offsets.
/// Offsets only ever come from the first chunk; the iterator is one-shot.
fn run_filter(
    expr: &crate::plan::Expr,
    segment: &dyn SegmentInternal,
    ctx: &EvalCtx,
    active: usize,
    cache_offsets: &mut Option<Vec<i64>>,
) -> Result<Bitset> {
    let mut task = FilterTask::new(expr, segment, ctx, active)?;
    let mut matches = Bitset::new();
    while let Some(row_vector) = task.next()? {
        match row_vector {
            RowVector::Bool(flags) => matches.append_bools(flags.raw()),
            RowVector::BoolWithOffsets { flags, offsets } => {
                matches.append_bools(flags.raw());
                if cache_offsets.is_none() {
                    *cache_offsets = Some(offsets.into_inner());
                }
            }
        }
    }
    if matches.len() != active {
        return Err(Error::Unexpected(format!(
            "filter produced {} bits for {} active rows",
            matches.len(),
            active
        )));
    }
    Ok(matches)
}

/// ANN search over one segment.
pub fn execute_vector_plan(
    segment: &dyn SegmentInternal,
    plan: &VectorPlan,
    placeholders: &PlaceholderGroup,
    ctx: &EvalCtx,
) -> Result<SearchResult> {
    ctx.check()?;
    let nq = placeholders.num_queries();
    let active = segment.active_count(ctx.timestamp);

    // nothing visible at this timestamp: skip all work
    if active == 0 {
        return Ok(SearchResult::empty(nq, &plan.search_info));
    }

    let mut bitset = match &plan.filter {
        Some(expr) => {
            let mut unused = None;
            let mut matches = run_filter(expr, segment, ctx, active, &mut unused)?;
            // the evaluator reports matches as 1; visibility wants excluded as 1
            matches.flip();
            matches
        }
        None => Bitset::zeroes(active),
    };

    segment.mask_with_timestamps(&mut bitset, ctx.timestamp);
    segment.mask_with_delete(&mut bitset, active, ctx.timestamp);

    if bitset.all() {
        return Ok(SearchResult::empty(nq, &plan.search_info));
    }

    let mut result = SearchResult::default();
    segment.vector_search(
        &plan.search_info,
        placeholders.raw(),
        nq,
        ctx.timestamp,
        bitset.view(),
        &mut result,
    )?;
    result.round_distances(plan.search_info.round_decimal);
    Ok(result)
}

/// Retrieve (or count) over one segment.
pub fn execute_retrieve_plan(
    segment: &dyn SegmentInternal,
    plan: &RetrievePlan,
    ctx: &EvalCtx,
) -> Result<RetrieveResult> {
    ctx.check()?;
    let active = segment.active_count(ctx.timestamp);

    if active == 0 {
        return Ok(if plan.is_count {
            RetrieveResult::Count(0)
        } else {
            RetrieveResult::Offsets(Vec::new())
        });
    }

    let mut cache_offsets: Option<Vec<i64>> = None;
    let mut bitset = match &plan.filter {
        Some(expr) => {
            let mut matches = run_filter(expr, segment, ctx, active, &mut cache_offsets)?;
            matches.flip();
            matches
        }
        None => Bitset::zeroes(active),
    };

    segment.mask_with_timestamps(&mut bitset, ctx.timestamp);
    segment.mask_with_delete(&mut bitset, active, ctx.timestamp);

    if bitset.all() && !plan.is_count {
        return Ok(RetrieveResult::Offsets(Vec::new()));
    }

    if plan.is_count {
        let survivors = active - bitset.count_ones();
        return Ok(RetrieveResult::Count(survivors as i64));
    }

    // MVCC finalization: the cached-offset fast path re-checks only the
    // filter hits; otherwise flip to survivor polarity and scan
    let already_flipped = match &cache_offsets {
        Some(offsets) => {
            segment.timestamp_filter_offsets(&mut bitset, offsets, ctx.timestamp);
            false
        }
        None => {
            bitset.flip();
            segment.timestamp_filter(&mut bitset, ctx.timestamp);
            true
        }
    };

    let offsets = segment.find_first(plan.limit, &bitset, already_flipped)?;
    Ok(RetrieveResult::Offsets(offsets))
}
