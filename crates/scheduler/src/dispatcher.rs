//! The dispatcher: pops tasks, picks a CPU, and spawns a pinned worker per
//! task (spec.md §4.D).

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
};

use clock::Clock;
use logging::Logger;
use monitor::CpuMonitor;
use queue::BoundedQueue;
use task::{Outcome, Task};

use crate::{load_balancer::Counters, selection::select_cpu};

/// Consumes tasks from the shared queue and spawns a pinned worker for
/// each one.
///
/// One `Dispatcher` is created per [`crate::LoadBalancer`] and run on its
/// own thread via [`Dispatcher::run`]. Its states are, in order: idle
/// (before [`Dispatcher::run`] is called), running (`running` is true),
/// draining (`running` has been cleared but the loop keeps popping until
/// the queue reports shutdown-and-empty), stopped (the loop has returned).
/// These transitions are one-way.
pub struct Dispatcher {
    queue: Arc<BoundedQueue<Task>>,
    monitor: Arc<CpuMonitor>,
    running: Arc<AtomicBool>,
    in_flight: Arc<(Mutex<u64>, Condvar)>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    core_ids: Arc<Vec<core_affinity::CoreId>>,
    counters: Arc<Counters>,
    prediction_enabled: bool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        queue: Arc<BoundedQueue<Task>>,
        monitor: Arc<CpuMonitor>,
        running: Arc<AtomicBool>,
        in_flight: Arc<(Mutex<u64>, Condvar)>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        core_ids: Arc<Vec<core_affinity::CoreId>>,
        counters: Arc<Counters>,
        prediction_enabled: bool,
    ) -> Self {
        Self {
            queue,
            monitor,
            running,
            in_flight,
            clock,
            logger,
            core_ids,
            counters,
            prediction_enabled,
        }
    }

    /// Runs the dispatch loop until the queue reports shutdown-and-empty.
    ///
    /// A task popped while `running` has already been cleared is failed
    /// without being dispatched, rather than assigned a CPU; this is how a
    /// straggler left in the queue at `stop` time is accounted without a
    /// separate drain pass racing the dispatcher for the same items.
    pub fn run(&self) {
        self.logger.info("dispatcher started");

        while let Some(mut task) = self.queue.pop() {
            self.logger.debug(&format!("dequeued task {}", task.id()));

            if !self.running.load(Ordering::Acquire) {
                task.fail_without_running(self.clock.now());
                let _ = self.counters.total_failed.fetch_add(1, Ordering::AcqRel);
                continue;
            }

            let cpu = select_cpu(&self.monitor, self.prediction_enabled);
            let started_at = self.clock.now();
            task.record_start(cpu, started_at);
            self.monitor.stats(cpu).increment_active_tasks();
            {
                let (lock, _) = &*self.in_flight;
                *lock.lock().expect("in-flight mutex poisoned") += 1;
            }

            self.logger.info(&format!("task {} assigned to cpu {cpu}", task.id()));
            self.spawn_worker(task, cpu);
        }

        self.logger.info("dispatcher stopped");
    }

    fn spawn_worker(&self, mut task: Task, cpu: usize) {
        let clock = self.clock.clone();
        let logger = self.logger.clone();
        let monitor = self.monitor.clone();
        let in_flight = self.in_flight.clone();
        let counters = self.counters.clone();
        let core_ids = self.core_ids.clone();

        let _ = thread::spawn(move || {
            match core_ids.get(cpu) {
                Some(core_id) if core_affinity::set_for_current(*core_id) => {}
                _ => logger.warning(&format!(
                    "failed to pin worker thread to cpu {cpu}; continuing unpinned"
                )),
            }

            let payload = task.take_payload();
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| payload.run())) {
                Ok(()) => Outcome::Completed,
                Err(_) => {
                    logger.warning(&format!("task {} panicked; marking failed", task.id()));
                    Outcome::Failed
                }
            };

            let ended_at = clock.now();
            task.record_completion(outcome, ended_at);

            match outcome {
                Outcome::Completed => {
                    let _ = counters.total_completed.fetch_add(1, Ordering::AcqRel);
                }
                Outcome::Failed => {
                    let _ = counters.total_failed.fetch_add(1, Ordering::AcqRel);
                }
            }

            monitor.stats(cpu).decrement_active_tasks();

            let (lock, condvar) = &*in_flight;
            let mut count = lock.lock().expect("in-flight mutex poisoned");
            *count -= 1;
            if *count == 0 {
                condvar.notify_all();
            }
        });
    }
}
