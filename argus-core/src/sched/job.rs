//! Jobs: submission, completion tracking, result aggregation
//!
//! One job per client request. A job decomposes into one task per queried
//! segment (or a single task for build/load), all entering at the cpu
//! resource. Completion is tracked by a latch; the first failing task
//! records the job error and flips the shared cancel token so siblings
//! stop cooperatively. Partial results are never returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::Timestamp;
use crate::error::{Error, Result};
use crate::exec::{EvalCtx, RetrieveResult};
use crate::index::SearchResult;
use crate::plan::{Metric, PlaceholderGroup, RetrievePlan, VectorPlan};
use crate::segment::{Segment, SegmentInternal};
use crate::storage::{FileManagerContext, IndexMeta};

use super::graph::{PathOptimizer, ResourceGraph};
use super::resource::ResourceKind;
use super::task::{JobId, ScheduledTask, TaskKind, TaskOutput, TaskPayload, TaskState};

/// A client request, one job each.
pub enum JobRequest {
    Search {
        plan: VectorPlan,
        placeholders: PlaceholderGroup,
        segments: Vec<Arc<dyn SegmentInternal>>,
        ts: Timestamp,
        deadline: Option<Instant>,
    },
    Retrieve {
        plan: RetrievePlan,
        segments: Vec<Arc<dyn SegmentInternal>>,
        ts: Timestamp,
        deadline: Option<Instant>,
    },
    Build {
        dim: usize,
        metric: Metric,
        data: Vec<f32>,
        ctx: FileManagerContext,
        meta: IndexMeta,
    },
    Load {
        ctx: FileManagerContext,
        meta: IndexMeta,
    },
}

/// Aggregated result of a finished job.
#[derive(Debug)]
pub enum JobOutcome {
    /// Top-k merged across segments; offsets are engine-global row ids
    /// (segment base + local offset).
    Search(SearchResult),
    Retrieve(RetrieveResult),
    Built,
    Loaded,
}

/// How a job folds its task outputs.
enum Aggregation {
    Search { metric: Metric, bases: Vec<i64> },
    Retrieve { limit: i64, bases: Vec<i64> },
    Unit,
}

fn aggregate(aggregation: &Aggregation, outputs: Vec<TaskOutput>) -> Result<JobOutcome> {
    match aggregation {
        Aggregation::Search { metric, bases } => {
            let mut merged: Option<SearchResult> = None;
            for (ordinal, output) in outputs.into_iter().enumerate() {
                let TaskOutput::Search(mut result) = output else {
                    return Err(Error::Unexpected("non-search output in search job".into()));
                };
                result.translate_offsets(bases[ordinal]);
                match &mut merged {
                    None => merged = Some(result),
                    Some(acc) => acc.merge(&result, *metric)?,
                }
            }
            merged
                .map(JobOutcome::Search)
                .ok_or_else(|| Error::Unexpected("search job with no outputs".into()))
        }
        Aggregation::Retrieve { limit, bases } => {
            let mut offsets = Vec::new();
            let mut count: Option<i64> = None;
            for (ordinal, output) in outputs.into_iter().enumerate() {
                let TaskOutput::Retrieve(result) = output else {
                    return Err(Error::Unexpected("non-retrieve output in retrieve job".into()));
                };
                match result {
                    RetrieveResult::Count(c) => *count.get_or_insert(0) += c,
                    RetrieveResult::Offsets(segment_offsets) => offsets.extend(
                        segment_offsets
                            .into_iter()
                            .map(|offset| offset + bases[ordinal]),
                    ),
                }
            }
            Ok(JobOutcome::Retrieve(match count {
                Some(total) => RetrieveResult::Count(total),
                None => {
                    if *limit >= 0 {
                        offsets.truncate(*limit as usize);
                    }
                    RetrieveResult::Offsets(offsets)
                }
            }))
        }
        Aggregation::Unit => match outputs.into_iter().next() {
            Some(TaskOutput::Built) => Ok(JobOutcome::Built),
            Some(TaskOutput::Loaded) => Ok(JobOutcome::Loaded),
            _ => Err(Error::Unexpected("unit job without output".into())),
        },
    }
}

struct JobInner {
    pending: usize,
    outputs: Vec<Option<TaskOutput>>,
    error: Option<Error>,
}

/// Shared completion state of one job: a counting latch plus the output
/// slots, guarded by one mutex.
pub struct JobState {
    job_id: JobId,
    aggregation: Aggregation,
    cancel: Arc<AtomicBool>,
    inner: Mutex<JobInner>,
    condvar: Condvar,
}

impl JobState {
    fn new(
        job_id: JobId,
        task_count: usize,
        aggregation: Aggregation,
        cancel: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_id,
            aggregation,
            cancel,
            inner: Mutex::new(JobInner {
                pending: task_count,
                outputs: (0..task_count).map(|_| None).collect(),
                error: None,
            }),
            condvar: Condvar::new(),
        })
    }

    /// A single-slot state for tests that exercise tasks without a job.
    #[cfg(test)]
    pub(crate) fn detached() -> Arc<Self> {
        Self::new(0, 1, Aggregation::Unit, Arc::new(AtomicBool::new(false)))
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    fn complete_one(&self, inner: &mut JobInner) {
        inner.pending = inner.pending.saturating_sub(1);
        if inner.pending == 0 {
            self.condvar.notify_all();
        }
    }

    pub(crate) fn task_finished(&self, ordinal: usize, output: TaskOutput) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.outputs.get_mut(ordinal) {
            *slot = Some(output);
        }
        self.complete_one(&mut inner);
    }

    pub(crate) fn task_failed(&self, error: Error) {
        let mut inner = self.inner.lock();
        if inner.error.is_none() {
            // first failure wins; siblings stop cooperatively
            self.cancel.store(true, Ordering::Release);
            log::warn!("[job] job {} failed: {}", self.job_id, error);
            inner.error = Some(error);
        } else {
            log::debug!("[job] job {} sibling error: {}", self.job_id, error);
        }
        self.complete_one(&mut inner);
    }

    pub(crate) fn task_cancelled(&self) {
        let mut inner = self.inner.lock();
        if inner.error.is_none() {
            inner.error = Some(Error::Cancelled);
        }
        self.complete_one(&mut inner);
    }

    /// Flip the cancel token; queued tasks drain as cancelled, executing
    /// tasks observe the token between chunks.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
        let mut inner = self.inner.lock();
        if inner.error.is_none() {
            inner.error = Some(Error::Cancelled);
        }
        if inner.pending == 0 {
            self.condvar.notify_all();
        }
    }

    /// Block until every task reported, then aggregate or surface the
    /// job error.
    fn wait(&self) -> Result<JobOutcome> {
        let mut inner = self.inner.lock();
        while inner.pending > 0 {
            self.condvar.wait(&mut inner);
        }
        if let Some(error) = inner.error.take() {
            return Err(error);
        }
        let outputs = inner
            .outputs
            .iter_mut()
            .map(|slot| {
                slot.take()
                    .ok_or_else(|| Error::Unexpected("missing task output".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        drop(inner);
        aggregate(&self.aggregation, outputs)
    }
}

/// Caller-side handle to a submitted job.
pub struct JobHandle {
    state: Arc<JobState>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.state.job_id()
    }

    /// Block the submitting thread until the job completes.
    pub fn wait(self) -> Result<JobOutcome> {
        self.state.wait()
    }

    pub fn cancel(&self) {
        self.state.request_cancel();
    }
}

/// Accepts jobs, decomposes them into per-segment tasks, and queues those
/// at the cpu entry resource.
pub struct JobManager {
    graph: Arc<ResourceGraph>,
    optimizer: Arc<PathOptimizer>,
    next_job_id: AtomicU64,
    next_task_id: AtomicU64,
}

impl JobManager {
    pub fn new(graph: Arc<ResourceGraph>, optimizer: Arc<PathOptimizer>) -> Self {
        Self {
            graph,
            optimizer,
            next_job_id: AtomicU64::new(0),
            next_task_id: AtomicU64::new(0),
        }
    }

    fn next_task_id(&self) -> u64 {
        self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        // cpu is always the entry point; disk is a passive endpoint
        let entry = self
            .graph
            .resources_of_kind(ResourceKind::Cpu)
            .into_iter()
            .next()
            .ok_or(Error::ResourceUnavailable("cpu"))?;
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed) + 1;

        match request {
            JobRequest::Search {
                plan,
                placeholders,
                segments,
                ts,
                deadline,
            } => {
                if segments.is_empty() {
                    return Err(Error::Unexpected("search job with no segments".into()));
                }
                let required = if use_gpu_requested(&plan.search_info.params)
                    && self.optimizer.has_search_gpus()
                {
                    ResourceKind::Gpu
                } else {
                    ResourceKind::Cpu
                };
                if !self.graph.has_kind(required) {
                    return Err(Error::ResourceUnavailable(required.as_str()));
                }
                let bases = cumulative_bases(&segments, ts);
                let metric = plan.search_info.metric;
                let cancel = Arc::new(AtomicBool::new(false));
                let state = JobState::new(
                    job_id,
                    segments.len(),
                    Aggregation::Search { metric, bases },
                    Arc::clone(&cancel),
                );
                let plan = Arc::new(plan);
                let placeholders = Arc::new(placeholders);

                for (ordinal, segment) in segments.into_iter().enumerate() {
                    let payload = TaskPayload::Search {
                        segment,
                        plan: Arc::clone(&plan),
                        placeholders: Arc::clone(&placeholders),
                    };
                    self.enqueue_task(
                        &entry,
                        &state,
                        job_id,
                        TaskKind::Search,
                        required,
                        ordinal,
                        payload,
                        ts,
                        deadline,
                        Arc::clone(&cancel),
                    )?;
                }
                log::info!(
                    "[job] search job {} queued ({} segments, {:?})",
                    job_id,
                    plan_task_count(&state),
                    required
                );
                Ok(JobHandle { state })
            }
            JobRequest::Retrieve {
                plan,
                segments,
                ts,
                deadline,
            } => {
                if segments.is_empty() {
                    return Err(Error::Unexpected("retrieve job with no segments".into()));
                }
                let bases = cumulative_bases(&segments, ts);
                let cancel = Arc::new(AtomicBool::new(false));
                let state = JobState::new(
                    job_id,
                    segments.len(),
                    Aggregation::Retrieve {
                        limit: plan.limit,
                        bases,
                    },
                    Arc::clone(&cancel),
                );
                let plan = Arc::new(plan);

                for (ordinal, segment) in segments.into_iter().enumerate() {
                    let payload = TaskPayload::Retrieve {
                        segment,
                        plan: Arc::clone(&plan),
                    };
                    self.enqueue_task(
                        &entry,
                        &state,
                        job_id,
                        TaskKind::Retrieve,
                        ResourceKind::Cpu,
                        ordinal,
                        payload,
                        ts,
                        deadline,
                        Arc::clone(&cancel),
                    )?;
                }
                Ok(JobHandle { state })
            }
            JobRequest::Build {
                dim,
                metric,
                data,
                ctx,
                meta,
            } => {
                let required = if self.optimizer.has_build_gpus() {
                    ResourceKind::Gpu
                } else {
                    ResourceKind::Cpu
                };
                if !self.graph.has_kind(required) {
                    return Err(Error::ResourceUnavailable(required.as_str()));
                }
                let cancel = Arc::new(AtomicBool::new(false));
                let state = JobState::new(job_id, 1, Aggregation::Unit, Arc::clone(&cancel));
                let payload = TaskPayload::Build {
                    dim,
                    metric,
                    data: Arc::new(data),
                    ctx,
                    meta,
                };
                self.enqueue_task(
                    &entry,
                    &state,
                    job_id,
                    TaskKind::Build,
                    required,
                    0,
                    payload,
                    0,
                    None,
                    cancel,
                )?;
                Ok(JobHandle { state })
            }
            JobRequest::Load { ctx, meta } => {
                let cancel = Arc::new(AtomicBool::new(false));
                let state = JobState::new(job_id, 1, Aggregation::Unit, Arc::clone(&cancel));
                let payload = TaskPayload::Load { ctx, meta };
                self.enqueue_task(
                    &entry,
                    &state,
                    job_id,
                    TaskKind::Load,
                    ResourceKind::Cpu,
                    0,
                    payload,
                    0,
                    None,
                    cancel,
                )?;
                Ok(JobHandle { state })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue_task(
        &self,
        entry: &Arc<super::resource::Resource>,
        state: &Arc<JobState>,
        job_id: JobId,
        kind: TaskKind,
        required: ResourceKind,
        ordinal: usize,
        payload: TaskPayload,
        ts: Timestamp,
        deadline: Option<Instant>,
        cancel: Arc<AtomicBool>,
    ) -> Result<()> {
        let mut ctx = EvalCtx::new(ts).with_query_id(job_id).with_cancel(cancel);
        if let Some(deadline) = deadline {
            ctx = ctx.with_deadline(deadline);
        }
        let path = self.optimizer.route(&entry.name, required, kind)?;
        let mut task = ScheduledTask::new(
            Arc::clone(state),
            job_id,
            self.next_task_id(),
            kind,
            required,
            ordinal,
            path,
            payload,
            ctx,
        );
        task.transition(TaskState::Queued)?;
        entry.push(task);
        Ok(())
    }
}

fn use_gpu_requested(params: &serde_json::Value) -> bool {
    params
        .get("use_gpu")
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

/// Offset base per segment: the cumulative active row counts of the
/// segments before it, so merged offsets become engine-global row ids.
fn cumulative_bases(segments: &[Arc<dyn SegmentInternal>], ts: Timestamp) -> Vec<i64> {
    let mut bases = Vec::with_capacity(segments.len());
    let mut base = 0i64;
    for segment in segments {
        bases.push(base);
        base += segment.active_count(ts) as i64;
    }
    bases
}

fn plan_task_count(state: &Arc<JobState>) -> usize {
    state.inner.lock().outputs.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::INVALID_OFFSET;
    use crate::plan::SearchInfo;

    fn search_result(offsets: Vec<i64>, distances: Vec<f32>) -> SearchResult {
        SearchResult {
            total_nq: 1,
            unity_top_k: offsets.len(),
            offsets,
            distances,
        }
    }

    #[test]
    fn test_aggregate_search_translates_and_merges() {
        let aggregation = Aggregation::Search {
            metric: Metric::L2,
            bases: vec![0, 100],
        };
        let outputs = vec![
            TaskOutput::Search(search_result(vec![1, 2], vec![0.5, 0.9])),
            TaskOutput::Search(search_result(vec![3, INVALID_OFFSET], vec![0.1, f32::INFINITY])),
        ];
        let JobOutcome::Search(merged) = aggregate(&aggregation, outputs).unwrap() else {
            panic!("expected search outcome");
        };
        // segment 1's row 3 becomes global row 103 and wins
        assert_eq!(merged.offsets, vec![103, 1]);
        assert_eq!(merged.distances, vec![0.1, 0.5]);
    }

    #[test]
    fn test_aggregate_retrieve_concat_and_limit() {
        let aggregation = Aggregation::Retrieve {
            limit: 3,
            bases: vec![0, 10],
        };
        let outputs = vec![
            TaskOutput::Retrieve(RetrieveResult::Offsets(vec![0, 5])),
            TaskOutput::Retrieve(RetrieveResult::Offsets(vec![1, 2])),
        ];
        let JobOutcome::Retrieve(RetrieveResult::Offsets(offsets)) =
            aggregate(&aggregation, outputs).unwrap()
        else {
            panic!("expected offsets");
        };
        assert_eq!(offsets, vec![0, 5, 11]);
    }

    #[test]
    fn test_aggregate_counts_sum() {
        let aggregation = Aggregation::Retrieve {
            limit: -1,
            bases: vec![0, 10],
        };
        let outputs = vec![
            TaskOutput::Retrieve(RetrieveResult::Count(3)),
            TaskOutput::Retrieve(RetrieveResult::Count(4)),
        ];
        let JobOutcome::Retrieve(RetrieveResult::Count(total)) =
            aggregate(&aggregation, outputs).unwrap()
        else {
            panic!("expected count");
        };
        assert_eq!(total, 7);
    }

    #[test]
    fn test_latch_first_failure_wins_and_cancels_siblings() {
        let cancel = Arc::new(AtomicBool::new(false));
        let state = JobState::new(
            1,
            2,
            Aggregation::Search {
                metric: Metric::L2,
                bases: vec![0, 0],
            },
            Arc::clone(&cancel),
        );

        state.task_failed(Error::Segment("boom".into()));
        assert!(cancel.load(Ordering::Acquire));
        state.task_cancelled();

        let err = state.wait().unwrap_err();
        assert!(matches!(err, Error::Segment(_)));
    }

    #[test]
    fn test_latch_success_path() {
        let info = SearchInfo::new(1, Metric::L2);
        let cancel = Arc::new(AtomicBool::new(false));
        let state = JobState::new(
            1,
            1,
            Aggregation::Search {
                metric: Metric::L2,
                bases: vec![0],
            },
            cancel,
        );
        state.task_finished(0, TaskOutput::Search(SearchResult::empty(1, &info)));
        assert!(matches!(state.wait(), Ok(JobOutcome::Search(_))));
    }

    #[test]
    fn test_request_cancel_sets_error() {
        let cancel = Arc::new(AtomicBool::new(false));
        let state = JobState::new(1, 1, Aggregation::Unit, Arc::clone(&cancel));
        state.request_cancel();
        assert!(cancel.load(Ordering::Acquire));
        state.task_cancelled();
        assert!(matches!(state.wait(), Err(Error::Cancelled)));
    }
}
