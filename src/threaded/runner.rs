//! Threaded coordinator: fan out rounds to annealing cores, then merge.

use super::config::{Checkpoint, ThreadedConfig};
use super::merge::{average, best_index};
use crate::completion::{format_duration, CompletionCriteria};
use crate::data::{ConstraintData, InversionProblem};
use crate::error::{AnnealError, Result};
use crate::io::write_vector;
use crate::random::derive_seeds;
use crate::sa::{AnnealState, Annealer, BestState, Energy, SaConfig, SerialAnnealer};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs one [`SerialAnnealer`] per pool thread in rounds.
///
/// Each round every core anneals for the configured sub-completion budget
/// from the same merged state; afterwards the cores are joined and either
/// the lowest-energy core's best state (best-of) or the mean of all best
/// states (average) is installed on every core.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use u_annealing::completion::{IterationCompletion, SubCompletion};
/// use u_annealing::data::{csc_from_dense, ConstraintData, InversionProblem};
/// use u_annealing::sa::{Annealer, PerturbationFunction, SaConfig};
/// use u_annealing::threaded::{ThreadedAnnealer, ThreadedConfig};
///
/// let a = csc_from_dense(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
/// let eq = ConstraintData::new(a, vec![5.0, 5.0]).unwrap();
/// let problem = Arc::new(InversionProblem::new(eq, vec![0.0, 0.0]).unwrap());
/// let sa = SaConfig::default().with_perturbation(PerturbationFunction::Uniform { width: 0.1 });
/// let config = ThreadedConfig::default()
///     .with_threads(2)
///     .with_sub_completion(SubCompletion::Iterations(5_000))
///     .with_seed(1);
///
/// let mut tsa = ThreadedAnnealer::new(problem, sa, config).unwrap();
/// let start = tsa.initial_state();
/// let end = tsa.iterate(&start, &IterationCompletion::new(20_000)).unwrap();
/// assert!(end.iterations >= 20_000);
/// assert!(tsa.best_energy().total() < start.energy.total());
/// ```
#[derive(Debug)]
pub struct ThreadedAnnealer {
    problem: Arc<InversionProblem>,
    config: ThreadedConfig,
    workers: Vec<SerialAnnealer>,
    pool: rayon::ThreadPool,
    best: BestState,
    rounds: u64,
    checkpoints: u32,
}

impl ThreadedAnnealer {
    /// Creates `config.threads` cores sharing `problem`.
    ///
    /// With a master seed in `config`, each core gets a derived seed and
    /// `sa_config.seed` is ignored.
    pub fn new(
        problem: Arc<InversionProblem>,
        sa_config: SaConfig,
        config: ThreadedConfig,
    ) -> Result<Self> {
        config.validate().map_err(AnnealError::Config)?;

        let seeds = derive_seeds(config.seed.or(sa_config.seed), config.threads);
        let workers = seeds
            .into_iter()
            .map(|seed| SerialAnnealer::new(Arc::clone(&problem), sa_config.clone().with_seed(seed)))
            .collect::<Result<Vec<_>>>()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("tsa-worker-{i}"))
            .build()
            .map_err(|e| AnnealError::config(format!("failed to build thread pool: {e}")))?;

        let best = workers[0].best_state();
        Ok(Self {
            problem,
            config,
            workers,
            pool,
            best,
            rounds: 0,
            checkpoints: 0,
        })
    }

    pub fn config(&self) -> &ThreadedConfig {
        &self.config
    }

    pub fn problem(&self) -> &Arc<InversionProblem> {
        &self.problem
    }

    /// Completed rounds across all `iterate` calls.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// A state at iteration zero carrying the current best energy.
    pub fn initial_state(&self) -> AnnealState {
        AnnealState::initial(self.best.energy.clone(), self.best.num_non_zero)
    }

    /// Runs one round on every core and merges the results into `state`.
    fn run_round(&mut self, state: &mut AnnealState, fraction: Option<f64>) -> Result<()> {
        let worker_start = if self.config.start_sub_iterations_at_zero {
            AnnealState {
                iterations: 0,
                perturbs: 0,
                worse_kept: 0,
                ..state.clone()
            }
        } else {
            state.clone()
        };
        let sub = self.config.sub_completion.for_round(&worker_start, fraction);

        let ends: Vec<AnnealState> = {
            let workers = &mut self.workers;
            let start = &worker_start;
            let sub: &dyn CompletionCriteria = &*sub;
            self.pool.install(|| {
                workers
                    .par_iter_mut()
                    .enumerate()
                    .map(|(i, w)| {
                        w.iterate(start, sub).map_err(|e| AnnealError::Worker {
                            worker: i,
                            source: Box::new(e),
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })?
        };

        let advanced = ends
            .iter()
            .map(|e| e.iterations.saturating_sub(worker_start.iterations))
            .max()
            .unwrap_or(0);
        state.iterations += advanced;

        let merged = if self.config.average {
            for end in &ends {
                state.perturbs += end.perturbs.saturating_sub(worker_start.perturbs);
                state.worse_kept += end.worse_kept.saturating_sub(worker_start.worse_kept);
            }
            let bests: Vec<BestState> = self.workers.iter().map(Annealer::best_state).collect();
            let mut merged = average(&bests)?;
            if !self.problem.ranges().is_empty() {
                merged.energy = self.workers[0].calculate_energy(&merged.solution)?;
            }
            merged
        } else {
            let winner = best_index(self.workers.iter().map(|w| w.best_energy().total()))
                .ok_or_else(|| AnnealError::config("no worker produced a finite energy"))?;
            if self.workers[winner].best_energy().total() < self.best.energy.total() {
                let end = &ends[winner];
                state.perturbs += end.perturbs.saturating_sub(worker_start.perturbs);
                state.worse_kept += end.worse_kept.saturating_sub(worker_start.worse_kept);
            }
            debug!(winner, "best-of merge");
            self.workers[winner].best_state()
        };

        for w in &mut self.workers {
            w.set_results(merged.clone())?;
        }
        state.energy = merged.energy.clone();
        state.num_non_zero = merged.num_non_zero;
        self.best = merged;
        Ok(())
    }

    fn write_checkpoint(&mut self, checkpoint: &Checkpoint, iterations: u64) {
        self.checkpoints += 1;
        let path = checkpoint_path(&checkpoint.prefix, checkpoint.interval * self.checkpoints);
        info!(
            iterations,
            energy = self.best.energy.total(),
            path = %path.display(),
            "writing checkpoint"
        );
        if let Err(e) = write_vector(&path, &self.best.solution) {
            warn!(error = %e, path = %path.display(), "checkpoint write failed, continuing");
        }
    }
}

/// `<prefix>_checkpoint_<time>.bin`, next to the prefix.
pub fn checkpoint_path(prefix: &std::path::Path, at: Duration) -> PathBuf {
    let name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    prefix.with_file_name(format!("{name}_checkpoint_{}.bin", format_duration(at)))
}

impl Annealer for ThreadedAnnealer {
    fn iterate(
        &mut self,
        start: &AnnealState,
        criteria: &dyn CompletionCriteria,
    ) -> Result<AnnealState> {
        let clock = Instant::now();
        let mut checkpoint_clock = Instant::now();
        let mut state = AnnealState {
            energy: self.best.energy.clone(),
            num_non_zero: self.best.num_non_zero,
            ..start.clone()
        };
        let mut previous: Option<Energy> = None;

        debug!(
            threads = self.config.threads,
            sub_completion = %self.config.sub_completion,
            average = self.config.average,
            "threaded annealing started"
        );

        loop {
            state.elapsed = start.elapsed + clock.elapsed();
            if criteria.is_satisfied(&state) {
                break;
            }

            if let Some(checkpoint) = self.config.checkpoint.clone() {
                if checkpoint_clock.elapsed() >= checkpoint.interval {
                    self.write_checkpoint(&checkpoint, state.iterations);
                    checkpoint_clock = Instant::now();
                }
            }

            let fraction = criteria.estimate_fraction_completed(&state);
            self.run_round(&mut state, fraction)?;
            self.rounds += 1;
            state.elapsed = start.elapsed + clock.elapsed();

            let secs = state.elapsed.as_secs_f64();
            let rate = if secs > 0.0 {
                state.iterations as f64 / secs
            } else {
                0.0
            };
            let change = previous
                .as_ref()
                .map(|p| relative_change(p.total(), state.energy.total()));
            info!(
                round = self.rounds,
                iterations = state.iterations,
                iters_per_sec = rate.round(),
                non_zero = state.num_non_zero,
                num_vars = self.best.solution.len(),
                perturbs = state.perturbs,
                change_pct = change.map(|c| c * 100.0),
                "round done: {}",
                state.energy
            );
            previous = Some(state.energy.clone());
        }

        state.elapsed = start.elapsed + clock.elapsed();
        debug!(rounds = self.rounds, "threaded annealing finished");
        Ok(state)
    }

    fn best_energy(&self) -> &Energy {
        &self.best.energy
    }

    fn best_solution(&self) -> &[f64] {
        &self.best.solution
    }

    fn best_misfit(&self) -> &[f64] {
        &self.best.misfit
    }

    fn best_inequality_misfit(&self) -> Option<&[f64]> {
        self.best.misfit_ineq.as_deref()
    }

    fn num_non_zero(&self) -> usize {
        self.best.num_non_zero
    }

    fn set_results(&mut self, best: BestState) -> Result<()> {
        best.check_dims(
            self.problem.num_vars(),
            self.problem.equality().nrows(),
            self.problem.inequality().map(ConstraintData::nrows),
            self.problem.energy_len(),
        )?;
        for w in &mut self.workers {
            w.set_results(best.clone())?;
        }
        self.best = best;
        Ok(())
    }

    fn best_state(&self) -> BestState {
        self.best.clone()
    }
}

fn relative_change(before: f64, after: f64) -> f64 {
    if before == 0.0 {
        0.0
    } else {
        (after - before) / before
    }
}
