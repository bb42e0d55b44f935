//! Heterogeneous resource scheduling
//!
//! Search/retrieve/build work is routed through a graph of typed compute
//! resources (disk, cpu, gpu) connected by bandwidth-weighted links. Jobs
//! enter at the cpu resource, decompose into per-segment tasks, and
//! migrate along shortest-weighted paths until a resource of the required
//! kind executes them.

mod build;
mod graph;
mod job;
mod resource;
mod scheduler;
mod task;

pub use build::BuildMgr;
pub use graph::{PathOptimizer, ResourceGraph};
pub use job::{JobHandle, JobManager, JobOutcome, JobRequest, JobState};
pub use resource::{Resource, ResourceKind, TaskQueue};
pub use scheduler::Scheduler;
pub use task::{JobId, ScheduledTask, TaskId, TaskKind, TaskOutput, TaskPayload, TaskState};
