//! CPU selection policy (spec.md §4.D).

use monitor::CpuMonitor;

/// Picks the CPU with the lowest `effective_load`, tie-breaking on the
/// lowest index.
///
/// ```text
/// effective_load[i] = (current_usage[i] + predicted_load[i]) / 2   if prediction enabled
///                   = current_usage[i]                             otherwise
/// effective_load[i] += 10 * active_tasks[i]
/// ```
///
/// The `10x` weighting treats one already-assigned task as roughly ten
/// utilization points of prospective load, so a burst does not all land on
/// a momentarily cold CPU.
pub fn select_cpu(monitor: &CpuMonitor, prediction_enabled: bool) -> usize {
    let mut best_cpu = 0;
    let mut best_load = f64::INFINITY;

    for stats in monitor.all_stats() {
        let base = if prediction_enabled {
            (stats.current_usage() + stats.predicted_load()) / 2.0
        } else {
            stats.current_usage()
        };
        let effective_load = base + 10.0 * stats.active_tasks() as f64;

        if effective_load < best_load {
            best_load = effective_load;
            best_cpu = stats.cpu_id();
        }
    }

    best_cpu
}

#[cfg(test)]
mod test {
    use super::*;
    use logging::NullLogger;
    use monitor::{MonitorError, RawCpuSample, UtilizationSource};
    use std::sync::Arc;

    struct ScriptedSource(Vec<Vec<Option<RawCpuSample>>>);

    impl UtilizationSource for ScriptedSource {
        fn read(&mut self, _num_cpus: usize) -> Result<Vec<Option<RawCpuSample>>, MonitorError> {
            if self.0.is_empty() {
                Ok(vec![])
            } else {
                Ok(self.0.remove(0))
            }
        }
    }

    fn seeded_monitor(usages: &[f64], active_tasks: &[u64]) -> CpuMonitor {
        // Seed current_usage via two samples producing the desired delta,
        // using idle=0 and user=usage so total_delta == 100*usage/100.
        let first: Vec<Option<RawCpuSample>> = usages
            .iter()
            .map(|_| {
                Some(RawCpuSample {
                    ..Default::default()
                })
            })
            .collect();
        let second: Vec<Option<RawCpuSample>> = usages
            .iter()
            .map(|usage| {
                Some(RawCpuSample {
                    user: *usage as u64,
                    idle: 100 - *usage as u64,
                    ..Default::default()
                })
            })
            .collect();

        let monitor = CpuMonitor::new(
            usages.len(),
            4,
            false,
            Box::new(ScriptedSource(vec![first, second])),
            Arc::new(NullLogger),
        );
        monitor.sample();
        monitor.sample();

        for (cpu_id, count) in active_tasks.iter().enumerate() {
            for _ in 0..*count {
                monitor.stats(cpu_id).increment_active_tasks();
            }
        }

        monitor
    }

    #[test]
    fn cold_system_selects_cpu_zero_by_tie_break() {
        let monitor = seeded_monitor(&[0.0, 0.0, 0.0, 0.0], &[0, 0, 0, 0]);
        assert_eq!(select_cpu(&monitor, false), 0);
    }

    #[test]
    fn scenario_picks_lowest_usage_cpu() {
        let monitor = seeded_monitor(&[10.0, 90.0, 40.0, 30.0], &[0, 0, 0, 0]);
        assert_eq!(select_cpu(&monitor, false), 0);
    }

    #[test]
    fn active_task_bias_can_flip_the_decision() {
        let monitor = seeded_monitor(&[10.0, 90.0, 40.0, 30.0], &[3, 0, 0, 0]);
        // cpu 0: 10 + 30 = 40, cpu 3: 30 + 0 = 30 -> cpu 3 wins
        assert_eq!(select_cpu(&monitor, false), 3);
    }
}
