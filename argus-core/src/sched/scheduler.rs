//! Scheduler: per-resource loader and executor threads
//!
//! Each resource that enables them gets one loader thread and one or more
//! executor threads. The loader stages a task's working set and hands it
//! to the exec queue; the executor either runs the task (when the resource
//! kind matches the requirement) or forwards it one hop along its routed
//! path. `start`/`stop` are idempotent; stopping wakes every queue, joins
//! all threads, and drains abandoned tasks as cancelled so waiting jobs
//! unblock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::exec::{execute_retrieve_plan, execute_vector_plan};
use crate::index::{FlatIndex, VectorIndex};
use crate::storage::FileManager;

use super::build::BuildMgr;
use super::graph::ResourceGraph;
use super::resource::{Resource, ResourceKind};
use super::task::{ScheduledTask, TaskOutput, TaskPayload, TaskState};

pub struct Scheduler {
    graph: Arc<ResourceGraph>,
    build_mgr: Arc<BuildMgr>,
    file_manager: Option<Arc<dyn FileManager>>,
    /// Executor threads for the cpu resource; gpu/disk stay at one.
    cpu_executors: usize,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(
        graph: Arc<ResourceGraph>,
        build_mgr: Arc<BuildMgr>,
        file_manager: Option<Arc<dyn FileManager>>,
        cpu_executors: usize,
    ) -> Self {
        Self {
            graph,
            build_mgr,
            file_manager,
            cpu_executors: cpu_executors.max(1),
            stop: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.stop.load(Ordering::Acquire)
    }

    /// Launch loader/executor threads. Idempotent; a stopped scheduler
    /// stays stopped.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut threads = self.threads.lock();
        for resource in self.graph.resources() {
            if resource.enable_loader {
                threads.push(self.spawn_loader(Arc::clone(resource))?);
            }
            if resource.enable_executor {
                let executors = if resource.kind == ResourceKind::Cpu {
                    self.cpu_executors
                } else {
                    1
                };
                for slot in 0..executors {
                    threads.push(self.spawn_executor(Arc::clone(resource), slot)?);
                }
            }
        }
        log::info!("[scheduler] started {} worker threads", threads.len());
        Ok(())
    }

    /// Signal every queue, join all workers, and cancel whatever was left
    /// queued. Idempotent.
    pub fn stop(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        for resource in self.graph.resources() {
            resource.wake_all();
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
        // unblock jobs whose tasks never reached an executor
        for resource in self.graph.resources() {
            for mut task in resource.drain_all() {
                if task.transition(TaskState::Cancelled).is_ok() {
                    task.job.task_cancelled();
                }
            }
        }
        log::info!("[scheduler] stopped");
    }

    fn spawn_loader(&self, resource: Arc<Resource>) -> Result<JoinHandle<()>> {
        let stop = Arc::clone(&self.stop);
        std::thread::Builder::new()
            .name(format!("argus-load-{}", resource.name))
            .spawn(move || loader_loop(resource, stop))
            .map_err(Error::Io)
    }

    fn spawn_executor(&self, resource: Arc<Resource>, slot: usize) -> Result<JoinHandle<()>> {
        let stop = Arc::clone(&self.stop);
        let graph = Arc::clone(&self.graph);
        let build_mgr = Arc::clone(&self.build_mgr);
        let file_manager = self.file_manager.clone();
        std::thread::Builder::new()
            .name(format!("argus-exec-{}-{}", resource.name, slot))
            .spawn(move || executor_loop(resource, graph, build_mgr, file_manager, stop))
            .map_err(Error::Io)
    }
}

fn loader_loop(resource: Arc<Resource>, stop: Arc<AtomicBool>) {
    while let Some(mut task) = resource.pick_loader(&stop) {
        if task.is_cancel_requested() {
            finish_cancelled(&resource, task);
            continue;
        }
        if let Err(error) = task.transition(TaskState::Loading) {
            fail_task(&resource, task, error);
            continue;
        }
        // the working set for index-backed payloads is fetched at
        // execution via the file manager; in-memory segments stage nothing
        resource.queue_for_execution(task);
    }
}

fn executor_loop(
    resource: Arc<Resource>,
    graph: Arc<ResourceGraph>,
    build_mgr: Arc<BuildMgr>,
    file_manager: Option<Arc<dyn FileManager>>,
    stop: Arc<AtomicBool>,
) {
    while let Some(mut task) = resource.pick_executor(&stop) {
        if task.is_cancel_requested() {
            finish_cancelled(&resource, task);
            continue;
        }

        if resource.kind != task.required_kind {
            forward_task(&resource, &graph, task);
            continue;
        }

        if let Err(error) = task.transition(TaskState::Executing) {
            fail_task(&resource, task, error);
            continue;
        }

        // build and search share a capacity-1 permit per GPU device
        let permit = if resource.kind == ResourceKind::Gpu {
            build_mgr.permit(resource.device_id)
        } else {
            None
        };
        let _guard = permit.as_ref().map(|permit| permit.lock());

        log::debug!(
            "[scheduler] {} executing {} task {} (job {})",
            resource.name,
            task.kind.as_str(),
            task.task_id,
            task.job_id
        );
        let outcome = run_payload(&task, &file_manager);
        resource.task_departed();
        match outcome {
            Ok(output) => {
                let _ = task.transition(TaskState::Finished);
                task.job.task_finished(task.segment_ordinal, output);
            }
            Err(Error::Cancelled) => {
                let _ = task.transition(TaskState::Cancelled);
                task.job.task_cancelled();
            }
            Err(Error::DeadlineExceeded) => {
                // timeouts surface as a cancelled task and a failed job
                let _ = task.transition(TaskState::Cancelled);
                task.job.task_failed(Error::DeadlineExceeded);
            }
            Err(error) => {
                let _ = task.transition(TaskState::Failed);
                task.job.task_failed(error);
            }
        }
    }
}

/// Push the task one hop further along its routed path.
fn forward_task(resource: &Resource, graph: &ResourceGraph, mut task: ScheduledTask) {
    resource.task_departed();
    let Some(next) = task.next_hop().map(str::to_string) else {
        let error = Error::Unexpected(format!(
            "task {} requires {:?} but its route ends at {}",
            task.task_id, task.required_kind, resource.name
        ));
        let _ = task.transition(TaskState::Failed);
        task.job.task_failed(error);
        return;
    };
    match graph.get(&next) {
        Some(next_resource) => {
            task.advance_hop();
            if task.transition(TaskState::Queued).is_ok() {
                next_resource.push(task);
            } else {
                task.job
                    .task_failed(Error::Unexpected("task re-queue failed".into()));
            }
        }
        None => {
            let _ = task.transition(TaskState::Failed);
            task.job
                .task_failed(Error::Unexpected(format!("unknown resource {:?}", next)));
        }
    }
}

fn finish_cancelled(resource: &Resource, mut task: ScheduledTask) {
    resource.task_departed();
    let _ = task.transition(TaskState::Cancelled);
    task.job.task_cancelled();
}

fn fail_task(resource: &Resource, task: ScheduledTask, error: Error) {
    resource.task_departed();
    task.job.task_failed(error);
}

fn run_payload(
    task: &ScheduledTask,
    file_manager: &Option<Arc<dyn FileManager>>,
) -> Result<TaskOutput> {
    match &task.payload {
        TaskPayload::Search {
            segment,
            plan,
            placeholders,
        } => execute_vector_plan(segment.as_ref(), plan, placeholders, &task.ctx)
            .map(TaskOutput::Search),
        TaskPayload::Retrieve { segment, plan } => {
            execute_retrieve_plan(segment.as_ref(), plan, &task.ctx).map(TaskOutput::Retrieve)
        }
        TaskPayload::Build {
            dim,
            metric,
            data,
            ctx,
            meta,
        } => {
            let file_manager = file_manager
                .as_ref()
                .ok_or_else(|| Error::Config("no index root configured for build tasks".into()))?;
            task.ctx.check()?;
            let index = FlatIndex::build(*dim, *metric, data.as_ref().clone())?;
            file_manager.put_index(ctx, meta, &index)?;
            Ok(TaskOutput::Built)
        }
        TaskPayload::Load { ctx, meta } => {
            let file_manager = file_manager
                .as_ref()
                .ok_or_else(|| Error::Config("no index root configured for load tasks".into()))?;
            task.ctx.check()?;
            let index = file_manager.load_index(ctx, meta)?;
            log::debug!(
                "[scheduler] loaded index for segment {} field {} ({} rows)",
                meta.segment_id,
                meta.field_id,
                index.count()
            );
            Ok(TaskOutput::Loaded)
        }
    }
}
