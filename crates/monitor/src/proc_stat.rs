//! [`UtilizationSource`] backed by Linux's `/proc/stat`.

use std::io::{BufRead, BufReader};

use crate::{MonitorError, RawCpuSample, UtilizationSource};

/// Reads per-CPU jiffy counters from `/proc/stat`.
///
/// The first line (the aggregate `cpu` total) is skipped; the following
/// `num_cpus` lines are parsed as `cpu<N> user nice system idle iowait irq
/// softirq steal`, mirroring the original sampler's `sscanf` format.
#[derive(Debug, Default)]
pub struct ProcStatSource;

impl ProcStatSource {
    /// Creates a source that reads `/proc/stat` on every call.
    pub fn new() -> Self {
        Self
    }

    fn parse_line(line: &str) -> Option<RawCpuSample> {
        let mut fields = line.split_whitespace();
        let _label = fields.next()?; // "cpuN"

        let mut values = [0u64; 8];
        for value in values.iter_mut() {
            *value = fields.next()?.parse().ok()?;
        }

        Some(RawCpuSample {
            user: values[0],
            nice: values[1],
            system: values[2],
            idle: values[3],
            iowait: values[4],
            irq: values[5],
            softirq: values[6],
            steal: values[7],
        })
    }
}

impl UtilizationSource for ProcStatSource {
    fn read(&mut self, num_cpus: usize) -> Result<Vec<Option<RawCpuSample>>, MonitorError> {
        let file = std::fs::File::open("/proc/stat").map_err(MonitorError::SourceUnavailable)?;
        let mut lines = BufReader::new(file).lines();

        // Skip the aggregate "cpu ..." line.
        let _ = lines.next();

        let mut samples = Vec::with_capacity(num_cpus);
        for _ in 0..num_cpus {
            let parsed = match lines.next() {
                Some(Ok(line)) => Self::parse_line(&line),
                _ => None,
            };
            samples.push(parsed);
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let line = "cpu0 1 2 3 4 5 6 7 8";
        let sample = ProcStatSource::parse_line(line).expect("should parse");
        assert_eq!(
            sample,
            RawCpuSample {
                user: 1,
                nice: 2,
                system: 3,
                idle: 4,
                iowait: 5,
                irq: 6,
                softirq: 7,
                steal: 8,
            }
        );
    }

    #[test]
    fn rejects_truncated_line() {
        assert!(ProcStatSource::parse_line("cpu0 1 2 3").is_none());
    }

    #[test]
    fn rejects_non_numeric_field() {
        assert!(ProcStatSource::parse_line("cpu0 1 2 x 4 5 6 7 8").is_none());
    }
}
