//! Serial annealing core: the perturb / evaluate / accept loop.

use super::config::{NonnegativityConstraint, PerturbationFunction, SaConfig};
use super::energy::{
    calculate_energy, check, entropy_energy, entropy_sum, entropy_term, equality_energy,
    inequality_energy, Energy,
};
use super::perturb::propose;
use super::types::{count_non_zero, AnnealState, Annealer, BestState};
use crate::completion::CompletionCriteria;
use crate::data::{ConstraintData, InversionProblem};
use crate::error::{AnnealError, Result};
use crate::random::rng_from;
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Iterations between full energy recomputations that cancel the drift of
/// the incremental energy sums.
const DRIFT_INTERVAL: u64 = 100_000;

/// Iterations between full misfit consistency checks in debug builds.
#[cfg(debug_assertions)]
const DEBUG_CHECK_INTERVAL: u64 = 10_000;

/// Relative size of a negative incremental energy still treated as
/// round-off and settled to zero.
const DRIFT_TOLERANCE: f64 = 1e-9;

/// Two misfit buffers, one committed and one candidate.
///
/// Between iterations both hold identical values. A proposal writes the
/// candidate rows of one column; accepting flips which buffer is committed,
/// rejecting copies the committed rows back.
#[derive(Debug, Clone)]
struct MisfitBuffers {
    bufs: [Vec<f64>; 2],
    committed: usize,
}

impl MisfitBuffers {
    fn new(initial: &[f64]) -> Self {
        Self {
            bufs: [initial.to_vec(), initial.to_vec()],
            committed: 0,
        }
    }

    fn reset(&mut self, values: &[f64]) {
        self.bufs[0].copy_from_slice(values);
        self.bufs[1].copy_from_slice(values);
        self.committed = 0;
    }

    #[inline]
    fn committed(&self) -> &[f64] {
        &self.bufs[self.committed]
    }

    #[inline]
    fn split(&mut self) -> (&[f64], &mut [f64]) {
        let [a, b] = &mut self.bufs;
        if self.committed == 0 {
            (a.as_slice(), b.as_mut_slice())
        } else {
            (b.as_slice(), a.as_mut_slice())
        }
    }

    /// Writes `committed + p·column` into the candidate rows and returns the
    /// resulting change in squared misfit. One-sided systems only count
    /// positive misfits.
    #[inline]
    fn propose(&mut self, rows: &[usize], vals: &[f64], p: f64, one_sided: bool) -> f64 {
        let (committed, candidate) = self.split();
        let mut delta = 0.0;
        for (&row, &a) in rows.iter().zip(vals) {
            let old = committed[row];
            let new = a.mul_add(p, old);
            candidate[row] = new;
            delta += if one_sided {
                let (o, n) = (old.max(0.0), new.max(0.0));
                n * n - o * o
            } else {
                new * new - old * old
            };
        }
        delta
    }

    #[inline]
    fn sync(&mut self, rows: &[usize]) {
        let (committed, candidate) = self.split();
        for &row in rows {
            candidate[row] = committed[row];
        }
    }

    #[inline]
    fn accept(&mut self, rows: &[usize]) {
        self.committed ^= 1;
        self.sync(rows);
    }

    #[inline]
    fn reject(&mut self, rows: &[usize]) {
        self.sync(rows);
    }
}

/// Energy components of the committed working state.
#[derive(Debug, Clone, Copy)]
struct Components {
    equality: f64,
    inequality: f64,
    entropy_sum: f64,
    entropy: f64,
}

impl Components {
    fn total(&self) -> f64 {
        self.equality + self.entropy + self.inequality
    }
}

/// Single-threaded simulated annealing over one inversion problem.
///
/// Owns a private working solution and misfit buffers; the problem data is
/// shared read-only. Each [`iterate`](Annealer::iterate) call resumes from
/// the best state, so externally injected results (see
/// [`Annealer::set_results`]) take effect on the next batch.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use u_annealing::completion::IterationCompletion;
/// use u_annealing::data::{csc_from_dense, ConstraintData, InversionProblem};
/// use u_annealing::sa::{Annealer, PerturbationFunction, SaConfig, SerialAnnealer};
///
/// let a = csc_from_dense(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
/// let eq = ConstraintData::new(a, vec![5.0, 5.0]).unwrap();
/// let problem = Arc::new(InversionProblem::new(eq, vec![0.0, 0.0]).unwrap());
/// let config = SaConfig::default()
///     .with_perturbation(PerturbationFunction::Uniform { width: 0.1 })
///     .with_seed(42);
///
/// let mut sa = SerialAnnealer::new(problem, config).unwrap();
/// let start = sa.initial_state();
/// let end = sa.iterate(&start, &IterationCompletion::new(50_000)).unwrap();
/// assert_eq!(end.iterations, 50_000);
/// assert!(sa.best_energy().total() < start.energy.total());
/// ```
#[derive(Debug, Clone)]
pub struct SerialAnnealer {
    problem: Arc<InversionProblem>,
    config: SaConfig,
    rng: StdRng,
    best: BestState,
    x: Vec<f64>,
    misfit: MisfitBuffers,
    misfit_ineq: Option<MisfitBuffers>,
}

impl SerialAnnealer {
    /// Creates a core starting from the problem's initial solution.
    pub fn new(problem: Arc<InversionProblem>, config: SaConfig) -> Result<Self> {
        config.validate().map_err(AnnealError::Config)?;
        if problem.num_vars() == 0 {
            return Err(AnnealError::config("problem has no variables"));
        }
        if matches!(config.perturbation, PerturbationFunction::Variable { .. })
            && problem.perturbation_basis().is_none()
        {
            return Err(AnnealError::config(
                "variable perturbation function needs a perturbation basis",
            ));
        }

        let x = problem.initial().to_vec();
        let misfit = problem.equality().misfit(&x);
        let misfit_ineq = problem.inequality().map(|c| c.misfit(&x));
        let energy = problem_energy(&problem, &x, &misfit, misfit_ineq.as_deref())?;

        let rng = rng_from(config.seed);
        Ok(Self {
            misfit: MisfitBuffers::new(&misfit),
            misfit_ineq: misfit_ineq.as_deref().map(MisfitBuffers::new),
            best: BestState {
                energy,
                num_non_zero: count_non_zero(&x),
                solution: x.clone(),
                misfit,
                misfit_ineq,
            },
            x,
            problem,
            config,
            rng,
        })
    }

    pub fn config(&self) -> &SaConfig {
        &self.config
    }

    pub fn problem(&self) -> &Arc<InversionProblem> {
        &self.problem
    }

    /// A state at iteration zero carrying the current best energy.
    pub fn initial_state(&self) -> AnnealState {
        AnnealState::initial(self.best.energy.clone(), self.best.num_non_zero)
    }

    /// Full energy of an arbitrary solution against this core's problem.
    pub fn calculate_energy(&self, x: &[f64]) -> Result<Energy> {
        let misfit = self.problem.equality().misfit(x);
        let misfit_ineq = self.problem.inequality().map(|c| c.misfit(x));
        problem_energy(&self.problem, x, &misfit, misfit_ineq.as_deref())
    }
}

impl Annealer for SerialAnnealer {
    fn iterate(
        &mut self,
        start: &AnnealState,
        criteria: &dyn CompletionCriteria,
    ) -> Result<AnnealState> {
        let clock = Instant::now();
        let Self {
            problem,
            config,
            rng,
            best,
            x,
            misfit,
            misfit_ineq,
        } = self;

        let equality = problem.equality();
        let inequality = problem.inequality();
        let weight = problem.entropy_weight();
        let basis = problem.perturbation_basis();
        let n = x.len();

        // resume from the best state
        x.copy_from_slice(&best.solution);
        misfit.reset(&best.misfit);
        if let (Some(buf), Some(values)) = (misfit_ineq.as_mut(), best.misfit_ineq.as_deref()) {
            buf.reset(values);
        }
        let mut cur = Components {
            equality: best.energy.equality(),
            inequality: best.energy.inequality(),
            entropy_sum: if weight > 0.0 { entropy_sum(x) } else { 0.0 },
            entropy: best.energy.entropy(),
        };
        let mut cur_non_zero = best.num_non_zero;
        let mut current_is_best = true;
        let mut worse_since_best = 0u64;

        let mut state = start.clone();
        state.energy.clone_from(&best.energy);
        state.num_non_zero = best.num_non_zero;

        debug!(
            start_iteration = start.iterations,
            energy = best.energy.total(),
            "annealing core starting"
        );

        loop {
            state.elapsed = start.elapsed + clock.elapsed();
            if criteria.is_satisfied(&state) {
                break;
            }
            let iter = state.iterations + 1;
            let t = config.temperature(iter);

            if iter % DRIFT_INTERVAL == 0 {
                cur = full_components(x, misfit, misfit_ineq.as_ref(), weight)?;
            }
            #[cfg(debug_assertions)]
            if iter % DEBUG_CHECK_INTERVAL == 0 {
                debug_assert!(
                    misfits_consistent(equality, x, misfit.committed()),
                    "incremental misfit diverged from A·x − d at iteration {iter}"
                );
            }

            let index = rng.random_range(0..n);
            let old = x[index];
            let was_zero = old == 0.0;
            let basis_value = basis.map_or(0.0, |b| b[index]);
            let p = propose(
                &config.perturbation,
                config.nonnegativity,
                rng,
                t,
                old,
                basis_value,
            );
            let new = old + p;
            x[index] = new;

            let (rows, vals) = equality.column(index);
            let d_eq = misfit.propose(rows, vals, p, false);
            let ineq_rows = match (inequality, misfit_ineq.as_mut()) {
                (Some(c), Some(buf)) => {
                    let (r, v) = c.column(index);
                    Some((r, buf.propose(r, v, p, true)))
                }
                _ => None,
            };
            let d_ineq = ineq_rows.map_or(0.0, |(_, d)| d);

            let entropy_sum = if weight > 0.0 {
                cur.entropy_sum - entropy_term(old) + entropy_term(new)
            } else {
                0.0
            };
            let next = Components {
                equality: settle("equality", cur.equality + d_eq, cur.equality)?,
                inequality: settle("inequality", cur.inequality + d_ineq, cur.inequality)?,
                entropy_sum,
                entropy: entropy_energy(weight, entropy_sum)?,
            };
            let e_new = next.total();
            check("total", e_new)?;
            let delta = e_new - cur.total();

            let forced = was_zero && config.nonnegativity == NonnegativityConstraint::PreventZero;
            let accept = if forced || delta < 0.0 {
                true
            } else if t > 0.0 {
                let probability = (-delta * config.energy_scale / t).exp();
                rng.random_range(0.0..1.0) < probability
            } else {
                false
            };

            if accept {
                misfit.accept(rows);
                if let (Some((r, _)), Some(buf)) = (ineq_rows, misfit_ineq.as_mut()) {
                    buf.accept(r);
                }
                if delta > 0.0 {
                    worse_since_best += 1;
                }
                cur = next;
                state.perturbs += 1;
                if was_zero && new != 0.0 {
                    cur_non_zero += 1;
                } else if !was_zero && new == 0.0 {
                    cur_non_zero = cur_non_zero.saturating_sub(1);
                }

                if e_new < best.energy.total() || config.keep_current_as_best {
                    if current_is_best {
                        best.solution[index] = new;
                        let committed = misfit.committed();
                        for &row in rows {
                            best.misfit[row] = committed[row];
                        }
                        if let (Some((r, _)), Some(buf), Some(dst)) =
                            (ineq_rows, misfit_ineq.as_ref(), best.misfit_ineq.as_mut())
                        {
                            let committed = buf.committed();
                            for &row in r {
                                dst[row] = committed[row];
                            }
                        }
                    } else {
                        best.solution.copy_from_slice(x);
                        best.misfit.copy_from_slice(misfit.committed());
                        if let (Some(buf), Some(dst)) =
                            (misfit_ineq.as_ref(), best.misfit_ineq.as_mut())
                        {
                            dst.copy_from_slice(buf.committed());
                        }
                    }
                    best.energy
                        .set_components(cur.equality, cur.entropy, cur.inequality);
                    best.num_non_zero = cur_non_zero;
                    state
                        .energy
                        .set_components(cur.equality, cur.entropy, cur.inequality);
                    state.num_non_zero = cur_non_zero;
                    state.worse_kept += worse_since_best;
                    worse_since_best = 0;
                    current_is_best = true;
                } else {
                    current_is_best = false;
                }
            } else {
                x[index] = old;
                misfit.reject(rows);
                if let (Some((r, _)), Some(buf)) = (ineq_rows, misfit_ineq.as_mut()) {
                    buf.reject(r);
                }
            }

            state.iterations = iter;
        }

        // range entries are only tracked at batch boundaries
        self.best.energy = problem_energy(
            &self.problem,
            &self.best.solution,
            &self.best.misfit,
            self.best.misfit_ineq.as_deref(),
        )?;
        state.energy.clone_from(&self.best.energy);
        state.num_non_zero = self.best.num_non_zero;
        state.elapsed = start.elapsed + clock.elapsed();

        debug!(
            iterations = state.iterations - start.iterations,
            perturbs = state.perturbs - start.perturbs,
            energy = self.best.energy.total(),
            "annealing core finished"
        );
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
        self.best = best;
        Ok(())
    }

    fn best_state(&self) -> BestState {
        self.best.clone()
    }
}

/// Accepts a freshly accumulated energy component, settling round-off
/// negatives to zero and rejecting NaN or genuinely negative values.
#[inline]
fn settle(component: &'static str, value: f64, previous: f64) -> Result<f64> {
    if value < 0.0 && value >= -DRIFT_TOLERANCE * previous.abs().max(1.0) {
        return Ok(0.0);
    }
    check(component, value)?;
    Ok(value)
}

fn problem_energy(
    problem: &InversionProblem,
    x: &[f64],
    misfit: &[f64],
    misfit_ineq: Option<&[f64]>,
) -> Result<Energy> {
    calculate_energy(
        x,
        misfit,
        misfit_ineq,
        problem.ranges(),
        problem.entropy_weight(),
    )
}

fn full_components(
    x: &[f64],
    misfit: &MisfitBuffers,
    misfit_ineq: Option<&MisfitBuffers>,
    weight: f64,
) -> Result<Components> {
    let entropy_sum = if weight > 0.0 { entropy_sum(x) } else { 0.0 };
    Ok(Components {
        equality: equality_energy(misfit.committed()),
        inequality: misfit_ineq.map_or(0.0, |m| inequality_energy(m.committed())),
        entropy_sum,
        entropy: entropy_energy(weight, entropy_sum)?,
    })
}

#[cfg(debug_assertions)]
fn misfits_consistent(data: &ConstraintData, x: &[f64], misfit: &[f64]) -> bool {
    let full = data.misfit(x);
    full.iter()
        .zip(misfit)
        .all(|(&a, &b)| (a - b).abs() <= 1e-4 * a.abs().max(b.abs()).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::IterationCompletion;
    use crate::data::{csc_from_dense, csc_from_triplets, ConstraintRange};
    use crate::sa::CoolingSchedule;
    use proptest::prelude::*;

    fn identity_problem(d: Vec<f64>, initial: Vec<f64>) -> Arc<InversionProblem> {
        let n = d.len();
        let t: Vec<_> = (0..n).map(|i| (i, i, 1.0)).collect();
        let a = csc_from_triplets(n, n, &t).unwrap();
        Arc::new(InversionProblem::new(ConstraintData::new(a, d).unwrap(), initial).unwrap())
    }

    fn run(sa: &mut SerialAnnealer, iterations: u64) -> AnnealState {
        let start = sa.initial_state();
        sa.iterate(&start, &IterationCompletion::new(iterations)).unwrap()
    }

    #[test]
    fn test_two_by_two_converges_for_every_schedule() {
        for cooling in [
            CoolingSchedule::Classical,
            CoolingSchedule::Fast,
            CoolingSchedule::VeryFast,
            CoolingSchedule::Linear { iterations: 100_000 },
        ] {
            let problem = identity_problem(vec![5.0, 5.0], vec![0.0, 0.0]);
            let config = SaConfig::default()
                .with_cooling(cooling)
                .with_perturbation(PerturbationFunction::Uniform { width: 0.1 })
                .with_seed(42);
            let mut sa = SerialAnnealer::new(problem, config).unwrap();
            let end = run(&mut sa, 100_000);

            assert_eq!(end.iterations, 100_000);
            assert!(
                sa.best_energy().total() < 1e-2,
                "{cooling}: energy {} did not converge",
                sa.best_energy().total()
            );
            for &v in sa.best_solution() {
                assert!((v - 5.0).abs() < 0.1, "{cooling}: solution {v} far from 5");
            }
        }
    }

    #[test]
    fn test_best_energy_never_increases() {
        let problem = identity_problem(vec![3.0, 1.0, 2.0], vec![0.0; 3]);
        let config = SaConfig::default()
            .with_cooling(CoolingSchedule::Classical)
            .with_perturbation(PerturbationFunction::Uniform { width: 0.05 })
            .with_seed(9);
        let mut sa = SerialAnnealer::new(problem, config).unwrap();
        let mut state = sa.initial_state();
        let mut prev = state.energy.total();
        for _ in 0..50 {
            let target = IterationCompletion::new(state.iterations + 500);
            state = sa.iterate(&state, &target).unwrap();
            let e = sa.best_energy().total();
            assert!(
                e <= prev * (1.0 + 1e-9) + 1e-12,
                "best energy rose from {prev} to {e}"
            );
            prev = e;
        }
    }

    #[test]
    fn test_best_misfit_matches_full_recompute() {
        let a = csc_from_dense(&[
            vec![1.0, 2.0, 0.0, 0.5],
            vec![0.0, 1.0, 3.0, 0.0],
            vec![4.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let eq = ConstraintData::new(a, vec![1.0, 2.0, 3.0]).unwrap();
        let ineq_a = csc_from_dense(&[vec![1.0, 1.0, 1.0, 1.0]]).unwrap();
        let ineq = ConstraintData::new(ineq_a, vec![0.5]).unwrap();
        let problem = Arc::new(
            InversionProblem::new(eq.clone(), vec![0.1; 4])
                .unwrap()
                .with_inequality(ineq.clone())
                .unwrap(),
        );
        let config = SaConfig::default()
            .with_perturbation(PerturbationFunction::Uniform { width: 0.05 })
            .with_seed(3);
        let mut sa = SerialAnnealer::new(problem, config).unwrap();
        run(&mut sa, 20_000);

        let x = sa.best_solution().to_vec();
        for (got, want) in sa.best_misfit().iter().zip(eq.misfit(&x)) {
            assert!((got - want).abs() < 1e-9, "misfit {got} != {want}");
        }
        let got = sa.best_inequality_misfit().unwrap();
        for (got, want) in got.iter().zip(ineq.misfit(&x)) {
            assert!((got - want).abs() < 1e-9, "ineq misfit {got} != {want}");
        }
        let full = sa.calculate_energy(&x).unwrap();
        assert!((full.total() - sa.best_energy().total()).abs() < 1e-9);
    }

    #[test]
    fn test_nonnegativity_for_all_policies() {
        // d pulls the solution negative, so every policy is exercised
        let a = csc_from_dense(&[vec![1.0, 1.0], vec![1.0, -1.0]]).unwrap();
        let eq = ConstraintData::new(a, vec![-2.0, 1.0]).unwrap();
        for policy in [
            NonnegativityConstraint::TryZeroOften,
            NonnegativityConstraint::LimitZero,
            NonnegativityConstraint::PreventZero,
        ] {
            let problem = Arc::new(InversionProblem::new(eq.clone(), vec![0.5, 0.0]).unwrap());
            let config = SaConfig::default()
                .with_perturbation(PerturbationFunction::Tangent { scale: 1.0 })
                .with_nonnegativity(policy)
                .with_seed(11);
            let mut sa = SerialAnnealer::new(problem, config).unwrap();
            let mut state = sa.initial_state();
            for _ in 0..20 {
                let target = IterationCompletion::new(state.iterations + 200);
                state = sa.iterate(&state, &target).unwrap();
                assert!(
                    sa.best_solution().iter().all(|&v| v >= 0.0),
                    "{policy}: negative entry in {:?}",
                    sa.best_solution()
                );
                assert!(sa.x.iter().all(|&v| v >= 0.0));
            }
        }
    }

    #[test]
    fn test_prevent_zero_forces_acceptance_of_zero_variable() {
        // any move away from zero raises the energy
        let problem = identity_problem(vec![0.0], vec![0.0]);
        let config = SaConfig::default()
            .with_nonnegativity(NonnegativityConstraint::PreventZero)
            .with_energy_scale(1e20)
            .with_seed(5);
        let mut sa = SerialAnnealer::new(problem, config).unwrap();
        let end = run(&mut sa, 1);
        assert_eq!(end.perturbs, 1, "move from zero must be accepted");
        assert!(sa.x[0] > 0.0);
        // an uphill move is kept but is not a new best
        assert_eq!(sa.best_solution()[0], 0.0);
        assert_eq!(end.worse_kept, 0);
    }

    #[test]
    fn test_limit_zero_does_not_force_acceptance() {
        let problem = identity_problem(vec![0.0], vec![0.0]);
        let config = SaConfig::default()
            .with_nonnegativity(NonnegativityConstraint::LimitZero)
            .with_energy_scale(1e20)
            .with_seed(5);
        let mut sa = SerialAnnealer::new(problem, config).unwrap();
        let end = run(&mut sa, 1);
        assert_eq!(end.perturbs, 0);
        assert_eq!(sa.x[0], 0.0);
        assert_eq!(sa.num_non_zero(), 0);
    }

    #[test]
    fn test_keep_current_as_best_tracks_accepted_state() {
        let mut uphill_kept = false;
        for seed in 0..50 {
            let problem = identity_problem(vec![0.0], vec![1.0]);
            let config = SaConfig::default()
                .with_perturbation(PerturbationFunction::Uniform { width: 1.0 })
                .with_keep_current_as_best(true)
                .with_seed(seed);
            let mut sa = SerialAnnealer::new(problem, config).unwrap();
            let end = run(&mut sa, 1);
            if end.perturbs == 1 {
                assert_ne!(sa.best_solution()[0], 1.0);
                if sa.best_energy().total() > 1.0 {
                    uphill_kept = true;
                }
            } else {
                assert_eq!(sa.best_solution()[0], 1.0);
            }
        }
        assert!(uphill_kept, "an uphill move should have become the best state");
    }

    #[test]
    fn test_inequality_penalty_balances_equality() {
        // minimise (x - 5)^2 + max(x - 1, 0)^2 → x = 3, E = 8
        let a = csc_from_dense(&[vec![1.0]]).unwrap();
        let eq = ConstraintData::new(a.clone(), vec![5.0]).unwrap();
        let ineq = ConstraintData::new(a, vec![1.0]).unwrap();
        let problem = Arc::new(
            InversionProblem::new(eq, vec![0.0])
                .unwrap()
                .with_inequality(ineq)
                .unwrap(),
        );
        let config = SaConfig::default()
            .with_perturbation(PerturbationFunction::Uniform { width: 0.1 })
            .with_seed(21);
        let mut sa = SerialAnnealer::new(problem, config).unwrap();
        run(&mut sa, 100_000);
        assert!((sa.best_solution()[0] - 3.0).abs() < 0.05);
        assert!((sa.best_energy().total() - 8.0).abs() < 0.01);
        assert!(sa.best_energy().inequality() > 0.0);
    }

    #[test]
    fn test_ranges_partition_equality_energy() {
        let a = csc_from_dense(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![1.0, 1.0, 1.0],
        ])
        .unwrap();
        let eq = ConstraintData::new(a, vec![1.0, 2.0, 3.0, 7.0]).unwrap();
        let ranges = vec![
            ConstraintRange::new("Rates", "R", 0, 3, false),
            ConstraintRange::new("Total", "T", 3, 4, false),
        ];
        let problem = Arc::new(
            InversionProblem::new(eq, vec![0.0; 3])
                .unwrap()
                .with_ranges(ranges)
                .unwrap(),
        );
        let config = SaConfig::default()
            .with_perturbation(PerturbationFunction::Uniform { width: 0.1 })
            .with_seed(1);
        let mut sa = SerialAnnealer::new(problem, config).unwrap();
        run(&mut sa, 5_000);

        let e = sa.best_energy();
        assert_eq!(e.ranges().len(), 2);
        let sum: f64 = e.ranges().iter().sum();
        assert!((sum - e.equality()).abs() < 1e-9 * e.equality().max(1.0));
    }

    #[test]
    fn test_entropy_term_included() {
        let problem = Arc::new(
            InversionProblem::new(
                ConstraintData::new(csc_from_dense(&[vec![1.0, 1.0]]).unwrap(), vec![0.0])
                    .unwrap(),
                vec![0.0005, 0.0005],
            )
            .unwrap()
            .with_entropy_weight(0.1)
            .unwrap(),
        );
        let config = SaConfig::default()
            .with_perturbation(PerturbationFunction::Uniform { width: 1e-5 })
            .with_seed(2);
        let mut sa = SerialAnnealer::new(problem, config).unwrap();
        assert!(sa.best_energy().entropy() > 0.0);
        run(&mut sa, 1_000);
        let full = sa.calculate_energy(&sa.best_solution().to_vec()).unwrap();
        assert!((full.entropy() - sa.best_energy().entropy()).abs() < 1e-9 * full.entropy());
    }

    #[test]
    fn test_same_seed_same_result() {
        let make = || {
            let problem = identity_problem(vec![1.0, 2.0], vec![0.0, 0.0]);
            let config = SaConfig::default()
                .with_perturbation(PerturbationFunction::Gaussian { scale: 0.1 })
                .with_seed(77);
            SerialAnnealer::new(problem, config).unwrap()
        };
        let (mut a, mut b) = (make(), make());
        let ea = run(&mut a, 2_000);
        let eb = run(&mut b, 2_000);
        assert_eq!(a.best_solution(), b.best_solution());
        assert_eq!(ea.perturbs, eb.perturbs);
    }

    #[test]
    fn test_set_results_replaces_best_state() {
        let problem = identity_problem(vec![5.0, 5.0], vec![0.0, 0.0]);
        let config = SaConfig::default()
            .with_perturbation(PerturbationFunction::Uniform { width: 0.1 })
            .with_seed(4);
        let mut trained = SerialAnnealer::new(Arc::clone(&problem), config.clone()).unwrap();
        run(&mut trained, 10_000);
        let mut fresh = SerialAnnealer::new(problem, config.with_seed(5)).unwrap();

        fresh.set_results(trained.best_state()).unwrap();
        assert_eq!(fresh.best_state(), trained.best_state());

        let mut wrong = trained.best_state();
        wrong.solution.push(0.0);
        assert!(fresh.set_results(wrong).is_err());
    }

    #[test]
    fn test_variable_perturbation_requires_basis() {
        let problem = identity_problem(vec![1.0], vec![0.0]);
        let config = SaConfig::default()
            .with_perturbation(PerturbationFunction::Variable { multiplier: 1.0 });
        assert!(SerialAnnealer::new(problem, config).is_err());
    }

    #[test]
    fn test_worse_kept_counted_on_new_best() {
        let problem = identity_problem(vec![5.0, 5.0], vec![0.0, 0.0]);
        let config = SaConfig::default()
            .with_cooling(CoolingSchedule::Classical)
            .with_perturbation(PerturbationFunction::Uniform { width: 0.1 })
            .with_seed(8);
        let mut sa = SerialAnnealer::new(problem, config).unwrap();
        let end = run(&mut sa, 20_000);
        assert!(end.worse_kept > 0);
        assert!(end.worse_kept < end.perturbs);
    }

    proptest! {
        #[test]
        fn prop_incremental_misfit_matches_full(
            entries in proptest::collection::vec((0usize..6, 0usize..5, -3.0f64..3.0), 1..25),
            x in proptest::collection::vec(0.0f64..2.0, 5),
            d in proptest::collection::vec(-5.0f64..5.0, 6),
            col in 0usize..5,
            p in -1.0f64..1.0,
        ) {
            let a = csc_from_triplets(6, 5, &entries).unwrap();
            let data = ConstraintData::new(a, d).unwrap();
            let base = data.misfit(&x);
            let mut buffers = MisfitBuffers::new(&base);

            let (rows, vals) = data.column(col);
            let delta = buffers.propose(rows, vals, p, false);
            buffers.accept(rows);

            let mut moved = x.clone();
            moved[col] += p;
            let full = data.misfit(&moved);
            for (got, want) in buffers.committed().iter().zip(&full) {
                prop_assert!((got - want).abs() <= 1e-9 * want.abs().max(1.0));
            }
            // both buffers agree after accept
            prop_assert_eq!(&buffers.bufs[0], &buffers.bufs[1]);

            let want_delta = equality_energy(&full) - equality_energy(&base);
            prop_assert!((delta - want_delta).abs() <= 1e-9 * want_delta.abs().max(1.0));
        }

        #[test]
        fn prop_reject_restores_committed(
            entries in proptest::collection::vec((0usize..4, 0usize..3, -3.0f64..3.0), 1..10),
            col in 0usize..3,
            p in -1.0f64..1.0,
        ) {
            let a = csc_from_triplets(4, 3, &entries).unwrap();
            let data = ConstraintData::new(a, vec![1.0; 4]).unwrap();
            let base = data.misfit(&[0.5, 0.5, 0.5]);
            let mut buffers = MisfitBuffers::new(&base);

            let (rows, vals) = data.column(col);
            buffers.propose(rows, vals, p, true);
            buffers.reject(rows);
            prop_assert_eq!(buffers.committed(), base.as_slice());
            prop_assert_eq!(&buffers.bufs[0], &buffers.bufs[1]);
        }
    }
}
