//! Shared state types and the [`Annealer`] trait.

use super::energy::Energy;
use crate::completion::CompletionCriteria;
use crate::error::{AnnealError, Result};
use std::time::Duration;

/// Progress snapshot handed to completion criteria and returned by
/// [`Annealer::iterate`].
///
/// Counters are cumulative across `iterate` calls: the caller passes the
/// state it got back from the previous call as the next start.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnealState {
    /// Wall time since the run started.
    pub elapsed: Duration,
    /// Iterations completed.
    pub iterations: u64,
    /// Accepted perturbations.
    pub perturbs: u64,
    /// Accepted uphill moves that were later followed by a new best.
    pub worse_kept: u64,
    /// Non-zero entries in the best solution.
    pub num_non_zero: usize,
    /// Best energy found so far.
    pub energy: Energy,
}

impl AnnealState {
    /// A fresh state at iteration zero.
    pub fn initial(energy: Energy, num_non_zero: usize) -> Self {
        Self {
            elapsed: Duration::ZERO,
            iterations: 0,
            perturbs: 0,
            worse_kept: 0,
            num_non_zero,
            energy,
        }
    }
}

impl std::fmt::Display for AnnealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "iter={} perturbs={} nonzero={} elapsed={:.1}s {}",
            self.iterations,
            self.perturbs,
            self.num_non_zero,
            self.elapsed.as_secs_f64(),
            self.energy
        )
    }
}

/// Best-state triple (plus its non-zero count) exchanged between cores
/// during merges.
#[derive(Debug, Clone, PartialEq)]
pub struct BestState {
    pub energy: Energy,
    pub solution: Vec<f64>,
    pub misfit: Vec<f64>,
    pub misfit_ineq: Option<Vec<f64>>,
    pub num_non_zero: usize,
}

impl BestState {
    /// Checks the vector lengths against a problem's dimensions.
    pub fn check_dims(
        &self,
        num_vars: usize,
        num_rows: usize,
        num_ineq_rows: Option<usize>,
        energy_len: usize,
    ) -> Result<()> {
        if self.solution.len() != num_vars {
            return Err(AnnealError::config(format!(
                "solution has length {}, expected {num_vars}",
                self.solution.len()
            )));
        }
        if self.misfit.len() != num_rows {
            return Err(AnnealError::config(format!(
                "misfit has length {}, expected {num_rows}",
                self.misfit.len()
            )));
        }
        match (&self.misfit_ineq, num_ineq_rows) {
            (None, None) => {}
            (Some(m), Some(n)) if m.len() == n => {}
            (m, n) => {
                return Err(AnnealError::config(format!(
                    "inequality misfit length {:?} does not match {n:?}",
                    m.as_ref().map(Vec::len)
                )))
            }
        }
        if self.energy.len() != energy_len {
            return Err(AnnealError::config(format!(
                "energy vector has length {}, expected {energy_len}",
                self.energy.len()
            )));
        }
        Ok(())
    }
}

/// Counts strictly positive entries.
pub fn count_non_zero(x: &[f64]) -> usize {
    x.iter().filter(|&&v| v > 0.0).count()
}

/// Anything that can run annealing batches and exchange best states.
///
/// Implemented by the serial core and by the threaded coordinator, so the
/// distributed coordinator can wrap either.
pub trait Annealer: Send {
    /// Runs until `criteria` is satisfied, starting from the current best
    /// state. Returns the state reached; its counters continue from `start`.
    fn iterate(
        &mut self,
        start: &AnnealState,
        criteria: &dyn CompletionCriteria,
    ) -> Result<AnnealState>;

    fn best_energy(&self) -> &Energy;

    fn best_solution(&self) -> &[f64];

    fn best_misfit(&self) -> &[f64];

    fn best_inequality_misfit(&self) -> Option<&[f64]>;

    /// Non-zero entries in the best solution.
    fn num_non_zero(&self) -> usize;

    /// Replaces the best state wholesale. Only call between batches.
    fn set_results(&mut self, best: BestState) -> Result<()>;

    /// Owned copy of the best state.
    fn best_state(&self) -> BestState {
        BestState {
            energy: self.best_energy().clone(),
            solution: self.best_solution().to_vec(),
            misfit: self.best_misfit().to_vec(),
            misfit_ineq: self.best_inequality_misfit().map(<[f64]>::to_vec),
            num_non_zero: self.num_non_zero(),
        }
    }
}
