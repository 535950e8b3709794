#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! A task is an opaque unit of work with a priority tag and a lifecycle.
//!
//! A `Task` is created by [`Task::new`] (status `Pending`), moved to
//! `Running` by [`Task::record_start`] when the dispatcher picks a CPU for
//! it, then moved to its terminal status by [`Task::record_completion`] once
//! its payload has run (or panicked) on the assigned worker thread.

use std::time::Instant;

/// A unit of work that can be run, once, on a worker thread.
///
/// This is the type-safe analogue of a `void*` callback + argument pair: any
/// owned value that can be sent to another thread and invoked exactly once
/// satisfies this trait, including plain closures via the blanket impl below.
pub trait Runnable: Send + 'static {
    /// Invokes the payload. Called at most once, from the worker thread
    /// pinned to the task's assigned CPU.
    fn run(self: Box<Self>);
}

impl<F> Runnable for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// Scheduling priority tag stored on a task.
///
/// The current dispatch policy ([`scheduler`](../scheduler/index.html))
/// does not use this value to choose a CPU; it is carried for future
/// fair-share or priority-inversion work (see spec Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Lowest priority tag.
    Low,
    /// Default priority tag.
    Medium,
    /// Elevated priority tag.
    High,
    /// Highest priority tag.
    Critical,
}

/// Lifecycle status of a task. Monotonic: `Pending -> Running -> (Completed | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Submitted, not yet picked up by the dispatcher.
    Pending,
    /// Assigned a CPU and running (or about to run) on a worker thread.
    Running,
    /// Ran to completion without the payload panicking.
    Completed,
    /// The payload panicked, or the task was drained on shutdown before it ran.
    Failed,
}

/// Sentinel value of `assigned_cpu` before a task has been dispatched.
pub const UNASSIGNED_CPU: i64 = -1;

/// An opaque unit of work plus its lifecycle state.
///
/// A task is mutated only by the dispatcher (assignment, start timestamp,
/// status transition to `Running`) and by the worker wrapper that runs its
/// payload (status transition to a terminal state, end timestamp). Nothing
/// else observes or mutates a task once it has been popped from the queue.
#[must_use]
pub struct Task {
    id: u64,
    priority: Priority,
    payload: Option<Box<dyn Runnable>>,
    status: Status,
    assigned_cpu: i64,
    created_at: Instant,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("assigned_cpu", &self.assigned_cpu)
            .finish()
    }
}

impl Task {
    /// Creates a new task with status `Pending`, stamping its creation time
    /// from `created_at`.
    ///
    /// `id` must be allocated by the caller from a process-wide monotonic
    /// counter (see [`TaskIdAllocator`]) so that uniqueness holds across the
    /// whole process rather than per-`Task` construction site.
    pub fn new(id: u64, payload: impl Runnable, priority: Priority, created_at: Instant) -> Self {
        Self {
            id,
            priority,
            payload: Some(Box::new(payload)),
            status: Status::Pending,
            assigned_cpu: UNASSIGNED_CPU,
            created_at,
            started_at: None,
            ended_at: None,
        }
    }

    /// This task's stable identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// This task's priority tag.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// This task's current lifecycle status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// The CPU this task has been assigned to, or `None` if not yet dispatched.
    pub fn assigned_cpu(&self) -> Option<usize> {
        if self.assigned_cpu < 0 {
            None
        } else {
            Some(self.assigned_cpu as usize)
        }
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Start timestamp, if the task has been dispatched.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// End timestamp, if the task has reached a terminal status.
    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    /// Takes ownership of the payload, leaving `None` behind.
    ///
    /// Called exactly once, by the worker wrapper, immediately before
    /// invoking [`Runnable::run`]. Panics if called twice: that would
    /// indicate the payload is being run more than once, which violates the
    /// single-call contract of [`Runnable`].
    pub fn take_payload(&mut self) -> Box<dyn Runnable> {
        self.payload
            .take()
            .expect("task payload already taken: a task's payload runs at most once")
    }

    /// Transitions `Pending -> Running`, recording the assigned CPU and the
    /// start timestamp.
    ///
    /// # Panics
    /// Panics if the task is not currently `Pending`: assignment happens at
    /// most once, only from `Pending`, so calling this twice (or after a
    /// terminal status) is a programming error in the dispatcher.
    pub fn record_start(&mut self, cpu: usize, started_at: Instant) {
        assert_eq!(
            self.status,
            Status::Pending,
            "record_start called on task {} with status {:?}, expected Pending",
            self.id,
            self.status
        );
        self.assigned_cpu = cpu as i64;
        self.started_at = Some(started_at);
        self.status = Status::Running;
    }

    /// Transitions `Running -> Completed` or `Running -> Failed`, recording
    /// the end timestamp.
    ///
    /// # Panics
    /// Panics if the task is not currently `Running`.
    pub fn record_completion(&mut self, outcome: Outcome, ended_at: Instant) {
        assert_eq!(
            self.status,
            Status::Running,
            "record_completion called on task {} with status {:?}, expected Running",
            self.id,
            self.status
        );
        self.status = match outcome {
            Outcome::Completed => Status::Completed,
            Outcome::Failed => Status::Failed,
        };
        self.ended_at = Some(ended_at);
    }

    /// Marks a still-`Pending` task `Failed` directly, without ever
    /// transitioning through `Running`.
    ///
    /// Used by the dispatcher to drain tasks left in the queue at shutdown
    /// (spec `stop` step 4) and to reject submissions made while the
    /// balancer is not running.
    ///
    /// # Panics
    /// Panics if the task is not currently `Pending`.
    pub fn fail_without_running(&mut self, ended_at: Instant) {
        assert_eq!(
            self.status,
            Status::Pending,
            "fail_without_running called on task {} with status {:?}, expected Pending",
            self.id,
            self.status
        );
        self.status = Status::Failed;
        self.ended_at = Some(ended_at);
    }
}

/// The outcome of running a task's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The payload ran to completion without panicking.
    Completed,
    /// The payload panicked, or otherwise could not run.
    Failed,
}

/// A process-wide monotonic task id source.
///
/// Owned by the [`LoadBalancer`](../scheduler/struct.LoadBalancer.html)
/// façade; nothing else is allowed to mutate it, so id uniqueness holds for
/// the lifetime of the process (spec Testable Property #1).
#[derive(Debug, Default)]
pub struct TaskIdAllocator {
    next: std::sync::atomic::AtomicU64,
}

impl TaskIdAllocator {
    /// Creates a new allocator starting at id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates and returns the next unique id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}
