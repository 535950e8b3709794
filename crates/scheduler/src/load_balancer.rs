//! The `LoadBalancer` façade (spec.md §4.E): the public surface wiring the
//! queue, monitor, and dispatcher together.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc, Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use clock::Clock;
use config::Config;
use logging::Logger;
use monitor::{proc_stat::ProcStatSource, CpuMonitor};
use queue::BoundedQueue;
use task::{Priority, Runnable, Task, TaskIdAllocator};

use crate::{dispatcher::Dispatcher, Error};

/// Default bound on every timed wait `stop` performs (spec.md §4.E).
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) total_submitted: AtomicU64,
    pub(crate) total_completed: AtomicU64,
    pub(crate) total_failed: AtomicU64,
}

/// Public entry point: accepts tasks, runs the monitor and dispatcher, and
/// coordinates shutdown.
pub struct LoadBalancer {
    config: Config,
    queue: Arc<BoundedQueue<Task>>,
    monitor: Arc<CpuMonitor>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    running: Arc<AtomicBool>,
    stop_initiated: AtomicBool,
    in_flight: Arc<(Mutex<u64>, Condvar)>,
    id_allocator: TaskIdAllocator,
    core_ids: Arc<Vec<core_affinity::CoreId>>,
    counters: Arc<Counters>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
    dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LoadBalancer {
    /// Builds a façade from a validated configuration. Does not start any
    /// threads; call [`LoadBalancer::start`] for that.
    pub fn new(config: Config, logger: Arc<dyn Logger>, clock: Arc<dyn Clock>) -> Self {
        let num_cpus = config.resolved_num_cpus();
        let queue = Arc::new(BoundedQueue::new(config.max_tasks));
        let monitor = Arc::new(CpuMonitor::new(
            num_cpus,
            config.load_history_size,
            config.enable_load_prediction,
            Box::new(ProcStatSource::new()),
            logger.clone(),
        ));

        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        if core_ids.len() < num_cpus {
            logger.warning(&format!(
                "host exposes {} pinnable core(s) but {num_cpus} are configured; workers on the \
                 remaining cpus will run unpinned",
                core_ids.len()
            ));
        }

        Self {
            config,
            queue,
            monitor,
            clock,
            logger,
            running: Arc::new(AtomicBool::new(false)),
            stop_initiated: AtomicBool::new(false),
            in_flight: Arc::new((Mutex::new(0), Condvar::new())),
            id_allocator: TaskIdAllocator::new(),
            core_ids: Arc::new(core_ids),
            counters: Arc::new(Counters::default()),
            monitor_handle: Mutex::new(None),
            dispatcher_handle: Mutex::new(None),
        }
    }

    /// Enqueues a task for dispatch. `priority` is recorded on the task but
    /// does not currently influence dispatch order (spec.md §9 DESIGN NOTES).
    pub fn submit<R: Runnable>(&self, runnable: R, priority: Priority) -> Result<u64, Error> {
        let id = self.id_allocator.next();
        let task = Task::new(id, runnable, priority, self.clock.now());

        match self.queue.push(task) {
            Ok(()) => {
                let _ = self.counters.total_submitted.fetch_add(1, Ordering::AcqRel);
                self.logger.debug(&format!("enqueued task {id}"));
                Ok(id)
            }
            Err(_) => {
                self.logger.error(&format!("task {id} rejected: queue is shut down"));
                Err(Error::Rejected)
            }
        }
    }

    /// Starts the monitor and dispatcher threads.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.logger.info("load balancer starting");

        let monitor = self.monitor.clone();
        let running = self.running.clone();
        let interval = Duration::from_millis(self.config.monitoring_interval_ms);
        let monitor_handle = thread::spawn(move || monitor.run_periodic(interval, &running));
        *self.monitor_handle.lock().expect("monitor handle mutex poisoned") = Some(monitor_handle);

        let dispatcher = Dispatcher::new(
            self.queue.clone(),
            self.monitor.clone(),
            self.running.clone(),
            self.in_flight.clone(),
            self.clock.clone(),
            self.logger.clone(),
            self.core_ids.clone(),
            self.counters.clone(),
            self.config.enable_load_prediction,
        );
        let dispatcher_handle = thread::spawn(move || dispatcher.run());
        *self.dispatcher_handle.lock().expect("dispatcher handle mutex poisoned") = Some(dispatcher_handle);

        self.logger.info("load balancer started");
    }

    /// Blocks until the global in-flight counter reaches zero.
    pub fn wait_quiescent(&self) {
        let (lock, condvar) = &*self.in_flight;
        let guard = lock.lock().expect("in-flight mutex poisoned");
        let _ = condvar.wait_while(guard, |count| *count > 0).expect("in-flight mutex poisoned");
    }

    /// Stops the monitor and dispatcher, draining any queued tasks to
    /// `Failed`. Idempotent: a second call is a no-op. Safe to call from
    /// any thread, including one woken only by a signal handler flag.
    pub fn stop(&self) {
        if self.stop_initiated.swap(true, Ordering::AcqRel) {
            return;
        }

        self.logger.info("load balancer stopping");

        // 1. Clear the running flag under the queue's own mutex, then...
        self.running.store(false, Ordering::Release);
        // 2-3. ...shut the queue down. `BoundedQueue::shutdown` notifies both
        // `not_empty` and `not_full` once, which is sufficient (spec.md §4.E
        // and §9 DESIGN NOTES: the source's triple broadcast is an artifact).
        self.queue.shutdown();

        // 4. Fail whatever is left in the queue. This races benignly with the
        // dispatcher thread, which fails the same kind of straggler itself
        // once `running` is false; each task is popped by exactly one side.
        self.drain_remaining();

        // 5. Bounded joins.
        self.join_with_timeout(&self.monitor_handle, "monitor");
        self.join_with_timeout(&self.dispatcher_handle, "dispatcher");

        // 6. Bounded wait for quiescence; proceed regardless of the outcome.
        self.wait_quiescent_with_timeout(DEFAULT_STOP_TIMEOUT);

        self.logger.info("load balancer stopped");
    }

    /// Lifetime count of tasks accepted by `submit`.
    pub fn total_submitted(&self) -> u64 {
        self.counters.total_submitted.load(Ordering::Acquire)
    }

    /// Lifetime count of tasks that ran their payload to completion.
    pub fn total_completed(&self) -> u64 {
        self.counters.total_completed.load(Ordering::Acquire)
    }

    /// Lifetime count of tasks that never ran, or whose payload panicked.
    pub fn total_failed(&self) -> u64 {
        self.counters.total_failed.load(Ordering::Acquire)
    }

    /// The monitor backing this façade, for reading per-CPU statistics.
    pub fn monitor(&self) -> &CpuMonitor {
        &self.monitor
    }

    fn drain_remaining(&self) {
        while let Some(mut task) = self.queue.pop() {
            task.fail_without_running(self.clock.now());
            let _ = self.counters.total_failed.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn join_with_timeout(&self, handle_slot: &Mutex<Option<JoinHandle<()>>>, name: &str) {
        let handle = handle_slot.lock().expect("join handle mutex poisoned").take();
        let Some(handle) = handle else {
            return;
        };

        let (done_tx, done_rx) = mpsc::channel();
        // std::thread::JoinHandle has no timed join; proxy it through a
        // watcher thread and a channel with a bounded receive instead.
        let _watcher = thread::spawn(move || {
            let _ = handle.join();
            let _ = done_tx.send(());
        });

        if done_rx.recv_timeout(DEFAULT_STOP_TIMEOUT).is_err() {
            self.logger.warning(&format!(
                "{name} thread did not join within {DEFAULT_STOP_TIMEOUT:?}; continuing without it"
            ));
        }
    }

    fn wait_quiescent_with_timeout(&self, timeout: Duration) {
        let (lock, condvar) = &*self.in_flight;
        let guard = lock.lock().expect("in-flight mutex poisoned");
        match condvar.wait_timeout_while(guard, timeout, |count| *count > 0) {
            Ok((_, result)) if result.timed_out() => {
                self.logger
                    .warning("in-flight counter did not reach zero within the stop timeout; proceeding");
            }
            _ => {}
        }
    }
}
