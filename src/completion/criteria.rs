//! Standard stop conditions.

use super::CompletionCriteria;
use crate::sa::AnnealState;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Stops once the iteration count reaches a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationCompletion {
    pub iterations: u64,
}

impl IterationCompletion {
    pub fn new(iterations: u64) -> Self {
        Self { iterations }
    }
}

impl CompletionCriteria for IterationCompletion {
    fn is_satisfied(&self, state: &AnnealState) -> bool {
        state.iterations >= self.iterations
    }

    fn estimate_fraction_completed(&self, state: &AnnealState) -> Option<f64> {
        if self.iterations == 0 {
            return Some(1.0);
        }
        Some((state.iterations as f64 / self.iterations as f64).min(1.0))
    }
}

/// Stops once the elapsed wall time reaches a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCompletion {
    pub duration: Duration,
}

impl TimeCompletion {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Parses `90s`, `5m`, `2h`, `250ms` or a bare millisecond count.
    pub fn parse(s: &str) -> Result<Self, String> {
        super::parse_duration(s).map(Self::new)
    }
}

impl CompletionCriteria for TimeCompletion {
    fn is_satisfied(&self, state: &AnnealState) -> bool {
        state.elapsed >= self.duration
    }

    fn estimate_fraction_completed(&self, state: &AnnealState) -> Option<f64> {
        if self.duration.is_zero() {
            return Some(1.0);
        }
        Some((state.elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0))
    }
}

/// Stops once the best total energy drops to a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyCompletion {
    pub max_energy: f64,
}

impl EnergyCompletion {
    pub fn new(max_energy: f64) -> Self {
        Self { max_energy }
    }
}

impl CompletionCriteria for EnergyCompletion {
    fn is_satisfied(&self, state: &AnnealState) -> bool {
        state.energy.total() <= self.max_energy
    }
}

/// Stops once the energy has stopped improving.
///
/// Satisfied when a full look-back window of history exists and, over that
/// window, the best energy improved by less than `min_percent` percent AND by
/// less than `min_diff` in absolute terms.
#[derive(Debug)]
pub struct EnergyChangeCompletion {
    pub lookback: Duration,
    pub min_percent: f64,
    pub min_diff: f64,
    history: Mutex<VecDeque<(Duration, f64)>>,
}

impl EnergyChangeCompletion {
    /// Samples kept per look-back window.
    const SAMPLES_PER_WINDOW: u32 = 64;

    pub fn new(lookback: Duration, min_percent: f64, min_diff: f64) -> Self {
        Self {
            lookback,
            min_percent,
            min_diff,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Parses `<minutes>,<percent>,<diff>`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(format!(
                "energy change criteria needs '<minutes>,<percent>,<diff>', got '{s}'"
            ));
        }
        let minutes: f64 = parts[0]
            .parse()
            .map_err(|e| format!("bad look-back minutes '{}': {e}", parts[0]))?;
        let percent: f64 = parts[1]
            .parse()
            .map_err(|e| format!("bad percent '{}': {e}", parts[1]))?;
        let diff: f64 = parts[2]
            .parse()
            .map_err(|e| format!("bad diff '{}': {e}", parts[2]))?;
        if !minutes.is_finite() || minutes <= 0.0 {
            return Err(format!("look-back must be positive, got {minutes}"));
        }
        Ok(Self::new(
            Duration::from_secs_f64(minutes * 60.0),
            percent,
            diff,
        ))
    }

    fn sample_interval(&self) -> Duration {
        self.lookback / Self::SAMPLES_PER_WINDOW
    }
}

impl Clone for EnergyChangeCompletion {
    fn clone(&self) -> Self {
        Self {
            lookback: self.lookback,
            min_percent: self.min_percent,
            min_diff: self.min_diff,
            history: Mutex::new(self.history.lock().clone()),
        }
    }
}

impl CompletionCriteria for EnergyChangeCompletion {
    fn is_satisfied(&self, state: &AnnealState) -> bool {
        let now = state.elapsed;
        let energy = state.energy.total();
        let mut history = self.history.lock();

        let due = history
            .back()
            .map_or(true, |&(t, _)| now >= t + self.sample_interval());
        if due {
            history.push_back((now, energy));
        }

        let Some(cutoff) = now.checked_sub(self.lookback) else {
            return false;
        };
        // keep exactly one sample at or before the cutoff as the reference
        while history.len() >= 2 && history[1].0 <= cutoff {
            history.pop_front();
        }
        let Some(&(t_ref, e_ref)) = history.front() else {
            return false;
        };
        if t_ref > cutoff {
            return false;
        }

        let diff = e_ref - energy;
        let percent = if e_ref > 0.0 { 100.0 * diff / e_ref } else { 0.0 };
        percent < self.min_percent && diff < self.min_diff
    }
}

/// Stops as soon as ANY component criteria is satisfied.
#[derive(Debug, Default)]
pub struct CompoundCompletion {
    criteria: Vec<Box<dyn CompletionCriteria>>,
}

impl CompoundCompletion {
    pub fn new(criteria: Vec<Box<dyn CompletionCriteria>>) -> Self {
        Self { criteria }
    }

    pub fn push(&mut self, criteria: Box<dyn CompletionCriteria>) {
        self.criteria.push(criteria);
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl CompletionCriteria for CompoundCompletion {
    fn is_satisfied(&self, state: &AnnealState) -> bool {
        self.criteria.iter().any(|c| c.is_satisfied(state))
    }

    /// The furthest-along component.
    fn estimate_fraction_completed(&self, state: &AnnealState) -> Option<f64> {
        self.criteria
            .iter()
            .filter_map(|c| c.estimate_fraction_completed(state))
            .reduce(f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sa::Energy;

    fn state(iterations: u64, secs: u64, energy: f64) -> AnnealState {
        AnnealState {
            elapsed: Duration::from_secs(secs),
            iterations,
            perturbs: 0,
            worse_kept: 0,
            num_non_zero: 0,
            energy: Energy::from_components(energy, 0.0, 0.0, &[]),
        }
    }

    #[test]
    fn test_iteration_completion() {
        let c = IterationCompletion::new(100);
        assert!(!c.is_satisfied(&state(99, 0, 1.0)));
        assert!(c.is_satisfied(&state(100, 0, 1.0)));
        assert_eq!(c.estimate_fraction_completed(&state(50, 0, 1.0)), Some(0.5));
    }

    #[test]
    fn test_time_completion() {
        let c = TimeCompletion::parse("2m").unwrap();
        assert!(!c.is_satisfied(&state(0, 119, 1.0)));
        assert!(c.is_satisfied(&state(0, 120, 1.0)));
        assert_eq!(c.estimate_fraction_completed(&state(0, 60, 1.0)), Some(0.5));
    }

    #[test]
    fn test_energy_completion() {
        let c = EnergyCompletion::new(0.5);
        assert!(!c.is_satisfied(&state(0, 0, 0.6)));
        assert!(c.is_satisfied(&state(0, 0, 0.5)));
    }

    #[test]
    fn test_compound_any() {
        let c = CompoundCompletion::new(vec![
            Box::new(IterationCompletion::new(10)),
            Box::new(EnergyCompletion::new(0.1)),
        ]);
        assert!(!c.is_satisfied(&state(5, 0, 1.0)));
        assert!(c.is_satisfied(&state(10, 0, 1.0)));
        assert!(c.is_satisfied(&state(5, 0, 0.05)));
        assert_eq!(c.estimate_fraction_completed(&state(5, 0, 1.0)), Some(0.5));
    }

    #[test]
    fn test_energy_change_needs_full_window() {
        let c = EnergyChangeCompletion::new(Duration::from_secs(60), 1.0, 1.0);
        // flat energy, but no full window yet
        assert!(!c.is_satisfied(&state(0, 0, 10.0)));
        assert!(!c.is_satisfied(&state(0, 30, 10.0)));
        assert!(c.is_satisfied(&state(0, 61, 10.0)));
    }

    #[test]
    fn test_energy_change_keeps_running_while_improving() {
        let c = EnergyChangeCompletion::new(Duration::from_secs(60), 1.0, 1.0);
        assert!(!c.is_satisfied(&state(0, 0, 100.0)));
        assert!(!c.is_satisfied(&state(0, 30, 80.0)));
        // 100 → 50 over the window: 50% and diff 50, both above thresholds
        assert!(!c.is_satisfied(&state(0, 61, 50.0)));
    }

    #[test]
    fn test_energy_change_parse() {
        let c = EnergyChangeCompletion::parse("2, 0.5, 10").unwrap();
        assert_eq!(c.lookback, Duration::from_secs(120));
        assert!((c.min_percent - 0.5).abs() < 1e-12);
        assert!((c.min_diff - 10.0).abs() < 1e-12);
        assert!(EnergyChangeCompletion::parse("2,0.5").is_err());
        assert!(EnergyChangeCompletion::parse("0,1,1").is_err());
    }
}
