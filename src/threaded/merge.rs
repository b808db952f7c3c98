//! Round merges: best-of and average.
//!
//! Both reductions are order independent: best-of resolves ties toward the
//! lowest index, and the average weights every state by `1/n`.

use crate::error::{AnnealError, Result};
use crate::sa::{count_non_zero, BestState, Energy};

/// Index of the lowest total energy.
///
/// NaN totals never win. Ties go to the lowest index. Returns `None` when
/// there is no candidate.
pub fn best_index<I>(totals: I) -> Option<usize>
where
    I: IntoIterator<Item = f64>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, total) in totals.into_iter().enumerate() {
        if total.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| total < b) {
            best = Some((i, total));
        }
    }
    best.map(|(i, _)| i)
}

/// Coordinate-wise mean of `states`: energy, solution and misfits are each
/// weighted `1/n`, then the non-zero count is recounted on the mean solution.
pub fn average(states: &[BestState]) -> Result<BestState> {
    let first = states
        .first()
        .ok_or_else(|| AnnealError::config("cannot average zero states"))?;
    for s in &states[1..] {
        s.check_dims(
            first.solution.len(),
            first.misfit.len(),
            first.misfit_ineq.as_ref().map(Vec::len),
            first.energy.len(),
        )?;
    }

    let weight = 1.0 / states.len() as f64;
    let mut energy = Energy::zeros(first.energy.len());
    let mut solution = vec![0.0; first.solution.len()];
    let mut misfit = vec![0.0; first.misfit.len()];
    let mut misfit_ineq = first.misfit_ineq.as_ref().map(|m| vec![0.0; m.len()]);

    for s in states {
        energy.add_scaled(&s.energy, weight);
        add_scaled(&mut solution, &s.solution, weight);
        add_scaled(&mut misfit, &s.misfit, weight);
        if let (Some(acc), Some(m)) = (misfit_ineq.as_mut(), s.misfit_ineq.as_ref()) {
            add_scaled(acc, m, weight);
        }
    }

    Ok(BestState {
        energy,
        num_non_zero: count_non_zero(&solution),
        solution,
        misfit,
        misfit_ineq,
    })
}

fn add_scaled(acc: &mut [f64], values: &[f64], weight: f64) {
    for (a, &v) in acc.iter_mut().zip(values) {
        *a = v.mul_add(weight, *a);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(total: f64, solution: Vec<f64>) -> BestState {
        let n = solution.len();
        BestState {
            energy: Energy::from_components(total, 0.0, 0.0, &[]),
            num_non_zero: count_non_zero(&solution),
            misfit: solution.iter().map(|v| v - 1.0).collect(),
            misfit_ineq: Some(vec![total; n]),
            solution,
        }
    }

    #[test]
    fn test_best_index_picks_minimum() {
        assert_eq!(best_index([3.0, 1.0, 2.0]), Some(1));
    }

    #[test]
    fn test_best_index_ties_and_nan() {
        assert_eq!(best_index([f64::NAN, 2.0, 2.0, 5.0]), Some(1));
        assert_eq!(best_index([f64::NAN]), None);
        assert_eq!(best_index(Vec::new()), None);
    }

    #[test]
    fn test_best_index_skips_leading_nan_and_keeps_first_tie() {
        assert_eq!(best_index([f64::NAN, f64::NAN, 7.0]), Some(2));
        assert_eq!(best_index([5.0, f64::NAN, 4.0, 4.0]), Some(2));
        assert_eq!(best_index([f64::INFINITY, 1.0e300]), Some(1));
    }

    #[test]
    fn test_average_two_states() {
        let avg = average(&[state(2.0, vec![0.0, 4.0]), state(4.0, vec![2.0, 0.0])]).unwrap();
        assert_eq!(avg.solution, vec![1.0, 2.0]);
        assert_eq!(avg.misfit, vec![0.0, 1.0]);
        assert_eq!(avg.misfit_ineq, Some(vec![3.0, 3.0]));
        assert_eq!(avg.energy.total(), 3.0);
        assert_eq!(avg.num_non_zero, 2);
    }

    #[test]
    fn test_average_rejects_mismatch() {
        assert!(average(&[]).is_err());
        assert!(average(&[state(1.0, vec![1.0]), state(1.0, vec![1.0, 2.0])]).is_err());
    }

    proptest! {
        #[test]
        fn prop_average_is_coordinate_mean(
            rows in prop::collection::vec(prop::collection::vec(0.0f64..100.0, 5), 1..8),
        ) {
            let states: Vec<BestState> = rows
                .iter()
                .enumerate()
                .map(|(i, x)| state(i as f64, x.clone()))
                .collect();
            let avg = average(&states).unwrap();
            let n = rows.len() as f64;
            for j in 0..5 {
                let expected: f64 = rows.iter().map(|r| r[j] / n).sum();
                prop_assert!((avg.solution[j] - expected).abs() <= 1e-9 * expected.abs().max(1.0));
            }
        }

        #[test]
        fn prop_best_index_is_unique_minimum(
            totals in prop::collection::hash_set(0u32..10_000, 1..16),
        ) {
            let totals: Vec<f64> = totals.into_iter().map(f64::from).collect();
            let idx = best_index(totals.iter().copied()).unwrap();
            for (i, &t) in totals.iter().enumerate() {
                if i != idx {
                    prop_assert!(totals[idx] < t);
                }
            }
        }
    }
}
