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

//! Per-CPU utilization sampling, rolling history, and load prediction.
//!
//! [`CpuMonitor`] owns one [`CpuStats`] per configured CPU. Its own thread
//! calls [`CpuMonitor::run_periodic`], which repeatedly samples a
//! [`UtilizationSource`] and folds the result into each CPU's stats. The
//! dispatcher reads `current_usage`/`predicted_load` concurrently and
//! mutates `active_tasks`/`total_tasks_processed` through dedicated atomics
//! so it never blocks on the monitor's sampling path.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use logging::{LogLevel, Logger};

pub mod proc_stat;

/// The eight kernel-exported jiffy buckets for one CPU, in the order spec §6
/// names them: user, nice, system, idle, iowait, irq, softirq, steal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawCpuSample {
    /// Time spent in user mode.
    pub user: u64,
    /// Time spent in user mode with low priority (nice).
    pub nice: u64,
    /// Time spent in system mode.
    pub system: u64,
    /// Time spent idle.
    pub idle: u64,
    /// Time spent waiting for I/O to complete.
    pub iowait: u64,
    /// Time spent servicing hardware interrupts.
    pub irq: u64,
    /// Time spent servicing software interrupts.
    pub softirq: u64,
    /// Time stolen by other operating systems running in a virtualized environment.
    pub steal: u64,
}

impl RawCpuSample {
    fn total(&self) -> u64 {
        self.user
            .wrapping_add(self.nice)
            .wrapping_add(self.system)
            .wrapping_add(self.idle)
            .wrapping_add(self.iowait)
            .wrapping_add(self.irq)
            .wrapping_add(self.softirq)
            .wrapping_add(self.steal)
    }
}

/// Errors that can occur while reading the utilization source.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The utilization source could not be read at all (e.g. the file is
    /// missing). Individual per-CPU parse failures are *not* reported this
    /// way; see [`UtilizationSource::read`].
    #[error("utilization source unavailable: {0}")]
    SourceUnavailable(#[source] std::io::Error),
}

/// Abstracts the kernel-exported per-CPU jiffy stream (`/proc/stat` on
/// Linux) so the monitor can be sampled from a scripted source in tests.
pub trait UtilizationSource: Send {
    /// Reads one snapshot covering `num_cpus` CPUs.
    ///
    /// Returns `Err` only if the source as a whole could not be read.
    /// Returns `Ok` with one entry per CPU otherwise; an entry is `None`
    /// when that specific CPU's line could not be parsed, so other CPUs'
    /// samples are still applied (spec §4.C: "no sample is ever partially
    /// applied").
    fn read(&mut self, num_cpus: usize) -> Result<Vec<Option<RawCpuSample>>, MonitorError>;
}

struct SampleState {
    previous: Option<RawCpuSample>,
    current_usage: f64,
    usage_history: Vec<f64>,
    history_index: usize,
    predicted_load: f64,
}

impl SampleState {
    fn new(history_len: usize) -> Self {
        Self {
            previous: None,
            current_usage: 0.0,
            usage_history: vec![0.0; history_len],
            history_index: 0,
            predicted_load: 0.0,
        }
    }
}

/// Live utilization and scheduling state for one CPU.
pub struct CpuStats {
    cpu_id: usize,
    sample: Mutex<SampleState>,
    active_tasks: AtomicU64,
    total_tasks_processed: AtomicU64,
}

impl CpuStats {
    fn new(cpu_id: usize, history_len: usize) -> Self {
        Self {
            cpu_id,
            sample: Mutex::new(SampleState::new(history_len.max(1))),
            active_tasks: AtomicU64::new(0),
            total_tasks_processed: AtomicU64::new(0),
        }
    }

    /// The index of this CPU.
    pub fn cpu_id(&self) -> usize {
        self.cpu_id
    }

    /// Most recently computed usage percentage, in `[0, 100]`.
    pub fn current_usage(&self) -> f64 {
        self.sample.lock().expect("cpu stats mutex poisoned").current_usage
    }

    /// Smoothed load prediction, in `[0, 100]`. Zero until prediction has
    /// been enabled and at least one valid sample folded in.
    pub fn predicted_load(&self) -> f64 {
        self.sample.lock().expect("cpu stats mutex poisoned").predicted_load
    }

    /// Snapshot of the fixed-length usage history ring, oldest-write-order
    /// not implied: index `h` is the next slot to be overwritten.
    pub fn usage_history(&self) -> Vec<f64> {
        self.sample.lock().expect("cpu stats mutex poisoned").usage_history.clone()
    }

    /// Number of tasks the dispatcher has committed to this CPU that have
    /// not yet reached a terminal status.
    pub fn active_tasks(&self) -> u64 {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Lifetime count of tasks this CPU has finished running (completed or
    /// failed). Observational only; does not feed CPU selection.
    pub fn total_tasks_processed(&self) -> u64 {
        self.total_tasks_processed.load(Ordering::Acquire)
    }

    /// Called by the dispatcher at assignment time, before the worker is
    /// spawned.
    pub fn increment_active_tasks(&self) {
        let _ = self.active_tasks.fetch_add(1, Ordering::AcqRel);
    }

    /// Called by the worker wrapper when a task reaches a terminal status.
    pub fn decrement_active_tasks(&self) {
        let _ = self.active_tasks.fetch_sub(1, Ordering::AcqRel);
        let _ = self.total_tasks_processed.fetch_add(1, Ordering::AcqRel);
    }

    fn apply_sample(&self, new: RawCpuSample, prediction_enabled: bool) {
        let mut state = self.sample.lock().expect("cpu stats mutex poisoned");
        let history_len = state.usage_history.len();

        let previous = match state.previous.replace(new) {
            None => {
                // First-ever sample: seed the counters, no predecessor to diff against.
                state.current_usage = 0.0;
                return;
            }
            Some(previous) => previous,
        };

        let idle_delta = (new.idle as i64 + new.iowait as i64) - (previous.idle as i64 + previous.iowait as i64);
        let total_delta = new.total() as i64 - previous.total() as i64;

        if total_delta <= 0 {
            // No update to history on a zero-delta tick; current_usage unchanged.
            return;
        }

        let usage = 100.0 * (1.0 - (idle_delta as f64 / total_delta as f64));
        state.current_usage = usage;
        let index = state.history_index;
        state.usage_history[index] = usage;
        state.history_index = (index + 1) % history_len;

        if prediction_enabled {
            let warm_slots = state.history_index;
            state.predicted_load = if warm_slots == 0 {
                state.current_usage
            } else {
                state.usage_history[..warm_slots].iter().sum::<f64>() / warm_slots as f64
            };
        }
    }
}

/// Periodically refreshes per-CPU usage and prediction for a fixed set of
/// CPUs.
pub struct CpuMonitor {
    stats: Vec<CpuStats>,
    source: Mutex<Box<dyn UtilizationSource>>,
    prediction_enabled: bool,
    logger: std::sync::Arc<dyn Logger>,
}

impl CpuMonitor {
    /// Creates a monitor over `num_cpus` CPUs, each with a history ring of
    /// length `history_len`.
    pub fn new(
        num_cpus: usize,
        history_len: usize,
        prediction_enabled: bool,
        source: Box<dyn UtilizationSource>,
        logger: std::sync::Arc<dyn Logger>,
    ) -> Self {
        let stats = (0..num_cpus).map(|id| CpuStats::new(id, history_len)).collect();
        Self {
            stats,
            source: Mutex::new(source),
            prediction_enabled,
            logger,
        }
    }

    /// The number of CPUs this monitor tracks.
    pub fn num_cpus(&self) -> usize {
        self.stats.len()
    }

    /// Per-CPU stats, in CPU-index order.
    pub fn all_stats(&self) -> &[CpuStats] {
        &self.stats
    }

    /// Stats for one CPU.
    pub fn stats(&self, cpu_id: usize) -> &CpuStats {
        &self.stats[cpu_id]
    }

    /// Takes one snapshot, folding it into each CPU's stats.
    ///
    /// If the source as a whole is unreadable, logs a warning and returns
    /// without touching any state. A per-CPU parse failure within an
    /// otherwise-successful read is logged and skips only that CPU.
    pub fn sample(&self) {
        let read_result = self
            .source
            .lock()
            .expect("utilization source mutex poisoned")
            .read(self.stats.len());

        match read_result {
            Ok(per_cpu) => {
                for (cpu_id, (stats, raw)) in self.stats.iter().zip(per_cpu).enumerate() {
                    match raw {
                        Some(raw) => stats.apply_sample(raw, self.prediction_enabled),
                        None => self.logger.log(
                            LogLevel::Warning,
                            &format!("failed to parse utilization sample for cpu {cpu_id}; leaving its stats untouched"),
                        ),
                    }
                }
            }
            Err(err) => {
                self.logger
                    .log(LogLevel::Warning, &format!("{err}; skipping this sampling tick"));
            }
        }
    }

    /// Calls [`CpuMonitor::sample`] roughly every `interval`, until
    /// `running` is observed false. Checked before and after each sleep so
    /// the loop exits promptly once told to stop.
    pub fn run_periodic(&self, interval: Duration, running: &std::sync::atomic::AtomicBool) {
        while running.load(Ordering::Acquire) {
            self.sample();
            if !running.load(Ordering::Acquire) {
                break;
            }
            std::thread::sleep(interval);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use logging::NullLogger;
    use std::sync::Arc;

    struct ScriptedSource {
        samples: std::collections::VecDeque<Vec<Option<RawCpuSample>>>,
    }

    impl ScriptedSource {
        fn new(samples: Vec<Vec<Option<RawCpuSample>>>) -> Self {
            Self {
                samples: samples.into(),
            }
        }
    }

    impl UtilizationSource for ScriptedSource {
        fn read(&mut self, _num_cpus: usize) -> Result<Vec<Option<RawCpuSample>>, MonitorError> {
            Ok(self.samples.pop_front().unwrap_or_default())
        }
    }

    fn sample(user: u64, idle: u64) -> RawCpuSample {
        RawCpuSample {
            user,
            idle,
            ..Default::default()
        }
    }

    #[test]
    fn first_sample_seeds_and_reports_zero_usage() {
        let monitor = CpuMonitor::new(
            1,
            4,
            false,
            Box::new(ScriptedSource::new(vec![vec![Some(sample(10, 90))]])),
            Arc::new(NullLogger),
        );
        monitor.sample();
        assert_eq!(monitor.stats(0).current_usage(), 0.0);
    }

    #[test]
    fn identical_successive_samples_leave_usage_unchanged() {
        let monitor = CpuMonitor::new(
            1,
            4,
            false,
            Box::new(ScriptedSource::new(vec![
                vec![Some(sample(10, 90))],
                vec![Some(sample(10, 90))],
            ])),
            Arc::new(NullLogger),
        );
        monitor.sample();
        monitor.sample();
        assert_eq!(monitor.stats(0).current_usage(), 0.0);
    }

    #[test]
    fn usage_computed_from_idle_and_total_delta() {
        // Between samples: total grows by 100, idle by 20 -> 100*(1-20/100) = 80.
        let monitor = CpuMonitor::new(
            1,
            4,
            false,
            Box::new(ScriptedSource::new(vec![
                vec![Some(sample(0, 0))],
                vec![Some(sample(80, 20))],
            ])),
            Arc::new(NullLogger),
        );
        monitor.sample();
        monitor.sample();
        assert!((monitor.stats(0).current_usage() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn partial_parse_failure_leaves_that_cpu_untouched() {
        let monitor = CpuMonitor::new(
            2,
            4,
            false,
            Box::new(ScriptedSource::new(vec![
                vec![Some(sample(0, 0)), Some(sample(0, 0))],
                vec![Some(sample(80, 20)), None],
            ])),
            Arc::new(NullLogger),
        );
        monitor.sample();
        monitor.sample();
        assert!((monitor.stats(0).current_usage() - 80.0).abs() < 1e-9);
        assert_eq!(monitor.stats(1).current_usage(), 0.0);
    }

    #[test]
    fn history_index_wraps_modulo_h_without_corruption() {
        let history_len = 3;
        let mut samples = vec![vec![Some(sample(0, 0))]];
        for i in 1..=(3 * history_len as u64 + 1) {
            samples.push(vec![Some(sample(i * 10, 0))]);
        }
        let monitor = CpuMonitor::new(1, history_len, false, Box::new(ScriptedSource::new(samples)), Arc::new(NullLogger));
        for _ in 0..(3 * history_len + 2) {
            monitor.sample();
        }
        assert_eq!(monitor.stats(0).usage_history().len(), history_len);
    }

    #[test]
    fn prediction_averages_warm_slots_of_current_pass() {
        let monitor = CpuMonitor::new(
            1,
            4,
            true,
            Box::new(ScriptedSource::new(vec![
                vec![Some(sample(0, 0))],
                vec![Some(sample(100, 0))], // usage 100
                vec![Some(sample(200, 100))], // total+=100, idle+=100 -> usage 0
            ])),
            Arc::new(NullLogger),
        );
        monitor.sample();
        monitor.sample();
        monitor.sample();
        // history so far (warm slots [0,2)): [100, 0] -> mean 50
        assert!((monitor.stats(0).predicted_load() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn active_tasks_tracks_increment_decrement() {
        let monitor = CpuMonitor::new(1, 4, false, Box::new(ScriptedSource::new(vec![])), Arc::new(NullLogger));
        let stats = monitor.stats(0);
        stats.increment_active_tasks();
        stats.increment_active_tasks();
        assert_eq!(stats.active_tasks(), 2);
        stats.decrement_active_tasks();
        assert_eq!(stats.active_tasks(), 1);
        assert_eq!(stats.total_tasks_processed(), 1);
    }

    #[test]
    fn source_unavailable_leaves_stats_untouched() {
        struct FailingSource;
        impl UtilizationSource for FailingSource {
            fn read(&mut self, _num_cpus: usize) -> Result<Vec<Option<RawCpuSample>>, MonitorError> {
                Err(MonitorError::SourceUnavailable(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no /proc/stat",
                )))
            }
        }
        let monitor = CpuMonitor::new(1, 4, false, Box::new(FailingSource), Arc::new(NullLogger));
        monitor.sample();
        assert_eq!(monitor.stats(0).current_usage(), 0.0);
    }
}
