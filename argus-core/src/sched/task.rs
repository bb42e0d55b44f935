//! Scheduled tasks
//!
//! A job decomposes into tasks, one per segment (or one for a build/load
//! request). Each task is pinned to a starting resource and migrates along
//! its routed path until it reaches a resource whose kind matches its
//! requirement.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::error::{Error, Result};
use crate::exec::EvalCtx;
use crate::plan::{Metric, PlaceholderGroup, RetrievePlan, VectorPlan};
use crate::segment::SegmentInternal;
use crate::storage::{FileManagerContext, IndexMeta};

use super::job::JobState;
use super::resource::ResourceKind;

pub type JobId = u64;
pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Search,
    Retrieve,
    Build,
    Load,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Search => "search",
            TaskKind::Retrieve => "retrieve",
            TaskKind::Build => "build",
            TaskKind::Load => "load",
        }
    }
}

/// Task lifecycle. Loading can re-queue when the task must migrate to
/// another resource; cancellation is only honored before execution starts,
/// or cooperatively when the payload observes its cancel token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Queued,
    Loading,
    Executing,
    Finished,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn can_transition(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (New, Queued)
                | (Queued, Loading)
                | (Queued, Cancelled)
                | (Loading, Executing)
                | (Loading, Queued)
                | (Loading, Cancelled)
                | (Loading, Failed)
                | (Executing, Finished)
                | (Executing, Failed)
                | (Executing, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// The work a task carries to its executing resource.
pub enum TaskPayload {
    Search {
        segment: Arc<dyn SegmentInternal>,
        plan: Arc<VectorPlan>,
        placeholders: Arc<PlaceholderGroup>,
    },
    Retrieve {
        segment: Arc<dyn SegmentInternal>,
        plan: Arc<RetrievePlan>,
    },
    Build {
        dim: usize,
        metric: Metric,
        data: Arc<Vec<f32>>,
        ctx: FileManagerContext,
        meta: IndexMeta,
    },
    Load {
        ctx: FileManagerContext,
        meta: IndexMeta,
    },
}

/// What an executed task hands back to its job.
#[derive(Debug)]
pub enum TaskOutput {
    Search(crate::index::SearchResult),
    Retrieve(crate::exec::RetrieveResult),
    Built,
    Loaded,
}

/// One schedulable unit of work.
pub struct ScheduledTask {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub required_kind: ResourceKind,
    pub fingerprint: u64,
    /// Resource names from the entry resource to the executing resource.
    pub path: Vec<String>,
    /// Index of the resource the task currently sits on.
    pub hop: usize,
    pub state: TaskState,
    /// Position of the task's segment within its job, for result merging.
    pub segment_ordinal: usize,
    pub payload: TaskPayload,
    pub ctx: EvalCtx,
    pub job: Arc<JobState>,
}

impl ScheduledTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job: Arc<JobState>,
        job_id: JobId,
        task_id: TaskId,
        kind: TaskKind,
        required_kind: ResourceKind,
        segment_ordinal: usize,
        path: Vec<String>,
        payload: TaskPayload,
        ctx: EvalCtx,
    ) -> Self {
        let mut hasher = FxHasher::default();
        (job_id, task_id, kind.as_str()).hash(&mut hasher);
        Self {
            job_id,
            task_id,
            kind,
            required_kind,
            fingerprint: hasher.finish(),
            path,
            hop: 0,
            state: TaskState::New,
            segment_ordinal,
            payload,
            ctx,
            job,
        }
    }

    pub fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(Error::Unexpected(format!(
                "illegal task transition {:?} -> {:?} (task {})",
                self.state, next, self.task_id
            )));
        }
        self.state = next;
        Ok(())
    }

    /// The next resource along the routed path, if any.
    pub fn next_hop(&self) -> Option<&str> {
        self.path.get(self.hop + 1).map(String::as_str)
    }

    pub fn advance_hop(&mut self) {
        self.hop += 1;
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.ctx.cancel.load(std::sync::atomic::Ordering::Acquire)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_matrix() {
        use TaskState::*;
        assert!(New.can_transition(Queued));
        assert!(Queued.can_transition(Loading));
        assert!(Queued.can_transition(Cancelled));
        assert!(Loading.can_transition(Executing));
        assert!(Loading.can_transition(Queued));
        assert!(Executing.can_transition(Finished));
        assert!(Executing.can_transition(Failed));

        assert!(!New.can_transition(Executing));
        assert!(!Finished.can_transition(Queued));
        assert!(!Cancelled.can_transition(Executing));
        assert!(!Executing.can_transition(Queued));
    }

    #[test]
    fn test_illegal_transition_is_an_error() {
        let mut task = test_support::noop_task(1);
        task.transition(TaskState::Queued).unwrap();
        assert!(task.transition(TaskState::Finished).is_err());
        assert_eq!(task.state, TaskState::Queued);
    }

    #[test]
    fn test_hops() {
        let mut task = test_support::noop_task(1);
        task.path = vec!["cpu".into(), "gpu0".into()];
        assert_eq!(task.next_hop(), Some("gpu0"));
        task.advance_hop();
        assert_eq!(task.next_hop(), None);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = test_support::noop_task(1);
        let b = test_support::noop_task(1);
        let c = test_support::noop_task(2);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }
}
