//! Rank-level round loop.

use super::comm::Communicator;
use super::config::DistributedConfig;
use super::message::{decode_best, decode_rank, encode_best, encode_rank, RoundCommand, RoundReport};
use crate::completion::CompletionCriteria;
use crate::error::{AnnealError, Result};
use crate::sa::{AnnealState, Annealer, BestState, Energy};
use crate::threaded::merge::best_index;
use std::time::Instant;
use tracing::{debug, info};

/// Runs a local [`Annealer`] on every rank and keeps all ranks in lockstep.
///
/// Each round rank 0 broadcasts the start counters, every rank anneals
/// locally, the round reports are gathered on rank 0, rank 0 broadcasts the
/// winning rank, and the winner broadcasts its best state to everyone.
/// Rank 0 alone evaluates the top-level criteria and broadcasts
/// [`RoundCommand::Done`] once it is satisfied.
#[derive(Debug)]
pub struct DistributedAnnealer<A, C> {
    annealer: A,
    comm: C,
    config: DistributedConfig,
    rounds: u64,
}

impl<A: Annealer, C: Communicator> DistributedAnnealer<A, C> {
    pub fn new(annealer: A, comm: C, config: DistributedConfig) -> Result<Self> {
        config.validate().map_err(AnnealError::Config)?;
        Ok(Self {
            annealer,
            comm,
            config,
            rounds: 0,
        })
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn annealer(&self) -> &A {
        &self.annealer
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn into_inner(self) -> (A, C) {
        (self.annealer, self.comm)
    }

    /// Runs the round loop. On worker ranks `criteria` is never consulted.
    ///
    /// Any local failure is announced to the other ranks before returning,
    /// so the whole cluster stops.
    pub fn run(
        &mut self,
        start: &AnnealState,
        criteria: &dyn CompletionCriteria,
    ) -> Result<AnnealState> {
        let result = if self.comm.rank() == 0 {
            self.lead(start, criteria)
        } else {
            self.follow(start)
        };
        if let Err(e) = &result {
            self.comm.abort(&e.to_string());
        }
        result
    }

    fn lead(&mut self, start: &AnnealState, criteria: &dyn CompletionCriteria) -> Result<AnnealState> {
        let clock = Instant::now();
        let mut state = AnnealState {
            energy: self.annealer.best_energy().clone(),
            num_non_zero: self.annealer.num_non_zero(),
            ..start.clone()
        };
        loop {
            state.elapsed = start.elapsed + clock.elapsed();
            if criteria.is_satisfied(&state) {
                self.comm.broadcast(0, Some(RoundCommand::Done.encode()))?;
                break;
            }
            let cmd = RoundCommand::Start {
                iterations: state.iterations,
                perturbs: state.perturbs,
                worse_kept: state.worse_kept,
                elapsed: state.elapsed,
                fraction: criteria.estimate_fraction_completed(&state),
            };
            self.comm.broadcast(0, Some(cmd.encode()))?;
            self.round(&mut state, cmd)?;

            state.elapsed = start.elapsed + clock.elapsed();
            info!(
                round = self.rounds,
                ranks = self.comm.size(),
                iterations = state.iterations,
                perturbs = state.perturbs,
                non_zero = state.num_non_zero,
                "cluster round done: {}",
                state.energy
            );
        }
        Ok(state)
    }

    fn follow(&mut self, start: &AnnealState) -> Result<AnnealState> {
        let mut state = start.clone();
        loop {
            let cmd = RoundCommand::decode(&self.comm.broadcast(0, None)?)?;
            if cmd == RoundCommand::Done {
                break;
            }
            self.round(&mut state, cmd)?;
        }
        debug!(rank = self.comm.rank(), rounds = self.rounds, "worker rank done");
        Ok(state)
    }

    /// One round on this rank. On rank 0 `state` ends up holding the merged
    /// counters; other ranks only track the best state.
    fn round(&mut self, state: &mut AnnealState, cmd: RoundCommand) -> Result<()> {
        let RoundCommand::Start {
            iterations,
            perturbs,
            worse_kept,
            elapsed,
            fraction,
        } = cmd
        else {
            return Ok(());
        };
        let round_start = AnnealState {
            elapsed,
            iterations,
            perturbs,
            worse_kept,
            num_non_zero: self.annealer.num_non_zero(),
            energy: self.annealer.best_energy().clone(),
        };
        let sub = self.config.sub_completion.for_round(&round_start, fraction);
        let end = self.annealer.iterate(&round_start, &*sub)?;

        let report = RoundReport {
            energy: self.annealer.best_energy().total(),
            iterations: end.iterations,
            perturbs: end.perturbs,
            worse_kept: end.worse_kept,
        };
        let gathered = self.comm.gather(0, report.encode())?;

        let (winner_msg, reports) = match gathered {
            Some(raw) => {
                let reports = raw
                    .iter()
                    .map(|b| RoundReport::decode(b))
                    .collect::<Result<Vec<_>>>()?;
                let winner = best_index(reports.iter().map(|r| r.energy))
                    .ok_or_else(|| AnnealError::Comm("no rank reported a finite energy".into()))?;
                (Some(encode_rank(winner)), Some(reports))
            }
            None => (None, None),
        };
        let winner = decode_rank(&self.comm.broadcast(0, winner_msg)?)?;

        let best_msg = (self.comm.rank() == winner).then(|| encode_best(&self.annealer.best_state()));
        let best: BestState = decode_best(&self.comm.broadcast(winner, best_msg)?)?;
        if self.comm.rank() != winner {
            self.annealer.set_results(best)?;
        }
        self.rounds += 1;

        *state = end;
        if let Some(reports) = reports {
            let w = &reports[winner];
            state.iterations = reports.iter().map(|r| r.iterations).max().unwrap_or(w.iterations);
            state.perturbs = w.perturbs;
            state.worse_kept = w.worse_kept;
        }
        state.energy = self.annealer.best_energy().clone();
        state.num_non_zero = self.annealer.num_non_zero();
        debug!(rank = self.comm.rank(), winner, "round merged");
        Ok(())
    }
}

impl<A: Annealer, C: Communicator> Annealer for DistributedAnnealer<A, C> {
    fn iterate(
        &mut self,
        start: &AnnealState,
        criteria: &dyn CompletionCriteria,
    ) -> Result<AnnealState> {
        self.run(start, criteria)
    }

    fn best_energy(&self) -> &Energy {
        self.annealer.best_energy()
    }

    fn best_solution(&self) -> &[f64] {
        self.annealer.best_solution()
    }

    fn best_misfit(&self) -> &[f64] {
        self.annealer.best_misfit()
    }

    fn best_inequality_misfit(&self) -> Option<&[f64]> {
        self.annealer.best_inequality_misfit()
    }

    fn num_non_zero(&self) -> usize {
        self.annealer.num_non_zero()
    }

    /// Replaces the local best state only. Use between runs, on every rank.
    fn set_results(&mut self, best: BestState) -> Result<()> {
        self.annealer.set_results(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{IterationCompletion, SubCompletion};
    use crate::data::{csc_from_dense, ConstraintData, InversionProblem};
    use crate::distributed::LocalCluster;
    use crate::sa::{PerturbationFunction, SaConfig, SerialAnnealer};
    use std::sync::Arc;
    use std::thread;

    fn problem() -> Arc<InversionProblem> {
        let a = csc_from_dense(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let eq = ConstraintData::new(a, vec![2.0, 3.0, 5.0]).unwrap();
        Arc::new(InversionProblem::new(eq, vec![0.0, 0.0]).unwrap())
    }

    fn core(seed: u64) -> SerialAnnealer {
        let config = SaConfig::default()
            .with_perturbation(PerturbationFunction::Uniform { width: 0.1 })
            .with_seed(seed);
        SerialAnnealer::new(problem(), config).unwrap()
    }

    fn run_cluster(
        size: usize,
        make: impl Fn(usize) -> SerialAnnealer + Sync,
    ) -> Vec<Result<(AnnealState, BestState)>> {
        let config = DistributedConfig::default().with_sub_completion(SubCompletion::Iterations(5_000));
        thread::scope(|s| {
            let handles: Vec<_> = LocalCluster::new(size)
                .into_iter()
                .map(|comm| {
                    let config = config.clone();
                    let make = &make;
                    s.spawn(move || -> Result<(AnnealState, BestState)> {
                        let rank = comm.rank();
                        let mut d = DistributedAnnealer::new(make(rank), comm, config)?;
                        let start = d.annealer().initial_state();
                        let end = d.run(&start, &IterationCompletion::new(40_000))?;
                        Ok((end, d.annealer().best_state()))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_ranks_end_identical_and_converged() {
        let results = run_cluster(3, |rank| core(100 + rank as u64));
        let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

        let (root_state, root_best) = &results[0];
        assert_eq!(root_state.iterations, 40_000);
        assert!(root_best.energy.total() < 1e-2, "{}", root_best.energy);
        assert_eq!(root_state.energy, root_best.energy);
        for (_, best) in &results[1..] {
            assert_eq!(best.solution, root_best.solution);
            assert_eq!(best.energy, root_best.energy);
        }
    }

    #[test]
    fn test_rank_failure_aborts_cluster() {
        let results = run_cluster(3, |rank| {
            let mut sa = core(rank as u64);
            if rank == 2 {
                let mut bad = sa.best_state();
                bad.misfit[0] = f64::NAN;
                bad.misfit[1] = f64::NAN;
                sa.set_results(bad).unwrap();
            }
            sa
        });
        assert!(results.iter().all(Result::is_err));
        assert!(matches!(results[0], Err(AnnealError::Comm(_))));
        assert!(matches!(results[2], Err(AnnealError::InvalidEnergy { .. })));
    }
}
