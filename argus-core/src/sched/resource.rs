//! Compute resources and their task queues
//!
//! Every resource carries two FIFO queues: tasks land in the load queue,
//! the loader stage hands them to the exec queue, and the executor stage
//! either runs them or forwards them one hop along their route. Queues
//! block on a condvar tied to the scheduler's stop flag.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use super::task::ScheduledTask;

/// Kind of compute resource a task can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Disk,
    Cpu,
    Gpu,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Disk => "disk",
            ResourceKind::Cpu => "cpu",
            ResourceKind::Gpu => "gpu",
        }
    }
}

/// FIFO task queue guarded by its own mutex + condvar.
pub struct TaskQueue {
    inner: Mutex<VecDeque<ScheduledTask>>,
    condvar: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn push(&self, task: ScheduledTask) {
        self.inner.lock().push_back(task);
        self.condvar.notify_one();
    }

    /// Block until a task is available or `stop` is raised.
    pub fn pop(&self, stop: &AtomicBool) -> Option<ScheduledTask> {
        let mut queue = self.inner.lock();
        loop {
            if stop.load(Ordering::Acquire) {
                return None;
            }
            if let Some(task) = queue.pop_front() {
                return Some(task);
            }
            self.condvar.wait(&mut queue);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake every waiter so stopped threads can observe the stop flag.
    /// Takes the queue lock first: a worker between its stop check and
    /// `wait` still holds the lock, so the notification cannot be lost.
    pub fn notify_all(&self) {
        let _guard = self.inner.lock();
        self.condvar.notify_all();
    }

    /// Take every queued task, in order.
    pub fn drain(&self) -> Vec<ScheduledTask> {
        self.inner.lock().drain(..).collect()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// One node of the resource graph.
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub device_id: i64,
    pub enable_loader: bool,
    pub enable_executor: bool,
    load_queue: TaskQueue,
    exec_queue: TaskQueue,
    /// Tasks currently queued on or executing at this resource, used by
    /// the least-loaded GPU placement policy.
    inflight: AtomicUsize,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("device_id", &self.device_id)
            .field("enable_loader", &self.enable_loader)
            .field("enable_executor", &self.enable_executor)
            .field("inflight", &self.inflight)
            .finish()
    }
}

impl Resource {
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        device_id: i64,
        enable_loader: bool,
        enable_executor: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            device_id,
            enable_loader,
            enable_executor,
            load_queue: TaskQueue::new(),
            exec_queue: TaskQueue::new(),
            inflight: AtomicUsize::new(0),
        }
    }

    /// Append a task to the in-queue. Resources without a loader stage
    /// accept work straight into the exec queue.
    pub fn push(&self, task: ScheduledTask) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
        if self.enable_loader {
            self.load_queue.push(task);
        } else {
            self.exec_queue.push(task);
        }
    }

    /// Next task for the loader stage (FIFO); blocks until available or
    /// stopped.
    pub fn pick_loader(&self, stop: &AtomicBool) -> Option<ScheduledTask> {
        self.load_queue.pop(stop)
    }

    /// Next task for the executor stage (FIFO).
    pub fn pick_executor(&self, stop: &AtomicBool) -> Option<ScheduledTask> {
        self.exec_queue.pop(stop)
    }

    /// Hand a loaded task to the executor stage.
    pub fn queue_for_execution(&self, task: ScheduledTask) {
        self.exec_queue.push(task);
    }

    /// A task left this resource (executed, forwarded, or cancelled).
    pub fn task_departed(&self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn load(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    pub fn wake_all(&self) {
        self.load_queue.notify_all();
        self.exec_queue.notify_all();
    }

    /// Remove every queued task from both queues (used when stopping).
    pub fn drain_all(&self) -> Vec<ScheduledTask> {
        let mut tasks = self.load_queue.drain();
        tasks.extend(self.exec_queue.drain());
        for _ in &tasks {
            self.task_departed();
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::sched::task::test_support::noop_task;

    #[test]
    fn test_queue_fifo_order() {
        let queue = TaskQueue::new();
        let stop = AtomicBool::new(false);
        queue.push(noop_task(1));
        queue.push(noop_task(2));

        assert_eq!(queue.pop(&stop).unwrap().task_id, 1);
        assert_eq!(queue.pop(&stop).unwrap().task_id, 2);
    }

    #[test]
    fn test_pop_unblocks_on_stop() {
        let queue = Arc::new(TaskQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let q = Arc::clone(&queue);
        let s = Arc::clone(&stop);
        let handle = std::thread::spawn(move || q.pop(&s));

        stop.store(true, Ordering::Release);
        queue.notify_all();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_resource_without_loader_skips_load_queue() {
        let resource = Resource::new("cpu", ResourceKind::Cpu, 0, false, true);
        let stop = AtomicBool::new(false);
        resource.push(noop_task(5));
        assert_eq!(resource.load(), 1);
        assert_eq!(resource.pick_executor(&stop).unwrap().task_id, 5);
    }

    #[test]
    fn test_inflight_counting() {
        let resource = Resource::new("gpu0", ResourceKind::Gpu, 0, true, true);
        resource.push(noop_task(1));
        resource.push(noop_task(2));
        assert_eq!(resource.load(), 2);
        resource.task_departed();
        assert_eq!(resource.load(), 1);
    }
}
