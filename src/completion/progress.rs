//! Progress-recording wrapper around another criteria.

use super::CompletionCriteria;
use crate::error::Result;
use crate::sa::AnnealState;
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// One recorded point of the annealing trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub elapsed: Duration,
    pub iterations: u64,
    pub perturbs: u64,
    pub worse_kept: u64,
    pub num_non_zero: usize,
    pub energy: Vec<f64>,
}

impl From<&AnnealState> for ProgressSnapshot {
    fn from(state: &AnnealState) -> Self {
        Self {
            elapsed: state.elapsed,
            iterations: state.iterations,
            perturbs: state.perturbs,
            worse_kept: state.worse_kept,
            num_non_zero: state.num_non_zero,
            energy: state.energy.as_slice().to_vec(),
        }
    }
}

/// Delegates the stop decision to an inner criteria and records a snapshot
/// of the state at most once per `interval`, plus a final one when the inner
/// criteria fires.
#[derive(Debug)]
pub struct ProgressTracking {
    inner: Box<dyn CompletionCriteria>,
    interval: Duration,
    snapshots: Mutex<Vec<ProgressSnapshot>>,
}

impl ProgressTracking {
    pub fn new(inner: Box<dyn CompletionCriteria>, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            snapshots: Mutex::new(Vec::new()),
        }
    }

    /// Copy of everything recorded so far.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.snapshots.lock().clone()
    }

    /// Writes the recorded trajectory as CSV.
    ///
    /// Columns: elapsed milliseconds, iterations, perturbations, worse kept,
    /// non-zero count, then each energy component.
    pub fn write_csv(&self, path: &Path, range_names: &[String]) -> Result<()> {
        let snapshots = self.snapshots.lock();
        let file = std::fs::File::create(path)?;
        let mut out = std::io::BufWriter::new(file);

        write!(
            out,
            "Time (millis),Iterations,Perturbations,Worse Kept,Non Zeros,Total Energy,\
             Equality Energy,Entropy Energy,Inequality Energy"
        )?;
        for name in range_names {
            write!(out, ",{name}")?;
        }
        writeln!(out)?;

        for s in snapshots.iter() {
            write!(
                out,
                "{},{},{},{},{}",
                s.elapsed.as_millis(),
                s.iterations,
                s.perturbs,
                s.worse_kept,
                s.num_non_zero
            )?;
            for e in &s.energy {
                write!(out, ",{e}")?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }

    fn record(&self, state: &AnnealState, force: bool) {
        let mut snapshots = self.snapshots.lock();
        let due = force
            || snapshots
                .last()
                .map_or(true, |last| state.elapsed >= last.elapsed + self.interval);
        if !due || snapshots.last().is_some_and(|l| l.iterations == state.iterations && force) {
            return;
        }
        info!(
            iterations = state.iterations,
            perturbs = state.perturbs,
            non_zero = state.num_non_zero,
            elapsed_secs = state.elapsed.as_secs_f64(),
            "progress: {}",
            state.energy
        );
        snapshots.push(ProgressSnapshot::from(state));
    }
}

impl CompletionCriteria for ProgressTracking {
    fn is_satisfied(&self, state: &AnnealState) -> bool {
        let done = self.inner.is_satisfied(state);
        self.record(state, done);
        done
    }

    fn estimate_fraction_completed(&self, state: &AnnealState) -> Option<f64> {
        self.inner.estimate_fraction_completed(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::IterationCompletion;
    use crate::sa::Energy;

    fn state(iterations: u64, secs: u64) -> AnnealState {
        AnnealState {
            elapsed: Duration::from_secs(secs),
            iterations,
            perturbs: iterations / 2,
            worse_kept: 0,
            num_non_zero: 1,
            energy: Energy::from_components(1.0, 0.0, 0.0, &[]),
        }
    }

    #[test]
    fn test_records_at_interval_and_on_finish() {
        let p = ProgressTracking::new(
            Box::new(IterationCompletion::new(100)),
            Duration::from_secs(10),
        );
        assert!(!p.is_satisfied(&state(0, 0)));
        assert!(!p.is_satisfied(&state(10, 5)));
        assert!(!p.is_satisfied(&state(20, 10)));
        assert!(p.is_satisfied(&state(100, 12)));

        let snaps = p.snapshots();
        let iters: Vec<u64> = snaps.iter().map(|s| s.iterations).collect();
        assert_eq!(iters, vec![0, 20, 100]);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        let p = ProgressTracking::new(
            Box::new(IterationCompletion::new(1)),
            Duration::from_secs(1),
        );
        p.is_satisfied(&state(0, 0));
        p.is_satisfied(&state(1, 2));
        p.write_csv(&path, &[]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Time (millis),Iterations"));
        assert!(lines[2].starts_with("2000,1,0,0,1,1"));
    }
}
