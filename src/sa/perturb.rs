//! Step generation and nonnegativity enforcement.

use super::config::{NonnegativityConstraint, PerturbationFunction};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Lower bound on the temperature seen by temperature-dependent functions.
const MIN_TEMPERATURE: f64 = 1e-300;

/// Basis substituted for a zero entry of the variable-perturbation basis.
const ZERO_BASIS: f64 = 1e-8;

/// Resampling attempts before a negative step is reflected instead.
const MAX_RESAMPLES: usize = 10_000;

/// Draws one raw step from `function` at temperature `temperature`.
///
/// `basis` is the variable's entry in the perturbation basis; only
/// [`PerturbationFunction::Variable`] reads it.
pub(crate) fn sample<R: Rng>(
    function: &PerturbationFunction,
    rng: &mut R,
    temperature: f64,
    basis: f64,
) -> f64 {
    let t = temperature.max(MIN_TEMPERATURE);
    let r: f64 = rng.random_range(0.0..1.0);
    match *function {
        PerturbationFunction::Uniform { width } => (r - 0.5) * width,
        PerturbationFunction::Variable { multiplier } => {
            let basis = if basis == 0.0 { ZERO_BASIS } else { basis };
            (r - 0.5) * basis * multiplier
        }
        PerturbationFunction::Gaussian { scale } => {
            let n: f64 = rng.sample(StandardNormal);
            n * scale * t.sqrt()
        }
        PerturbationFunction::Tangent { scale } => t * scale * (PI * r - PI / 2.0).tan(),
        PerturbationFunction::PowerLaw { scale } => {
            let u = 2.0 * r - 1.0;
            let magnitude = t * scale * ((1.0 + 1.0 / t).powf(u.abs()) - 1.0);
            magnitude.copysign(u)
        }
        PerturbationFunction::Exponential { scale } => {
            let magnitude = 10f64.powf(r) * t * scale;
            if rng.random::<bool>() {
                magnitude
            } else {
                -magnitude
            }
        }
    }
}

/// Draws a step for variable value `x` and reconciles it with `x >= 0`.
///
/// The returned step always satisfies `x + step >= 0`.
pub(crate) fn propose<R: Rng>(
    function: &PerturbationFunction,
    policy: NonnegativityConstraint,
    rng: &mut R,
    temperature: f64,
    x: f64,
    basis: f64,
) -> f64 {
    match policy {
        NonnegativityConstraint::TryZeroOften => {
            let p = sample(function, rng, temperature, basis);
            if x == 0.0 {
                resample_nonnegative(function, rng, temperature, x, basis, p)
            } else if x + p < 0.0 {
                -x
            } else {
                p
            }
        }
        NonnegativityConstraint::LimitZero => {
            let p = sample(function, rng, temperature, basis);
            resample_nonnegative(function, rng, temperature, x, basis, p)
        }
        NonnegativityConstraint::PreventZero => {
            if x != 0.0 {
                (rng.random_range(0.0..1.0) - 0.5) * 2.0 * x
            } else {
                // full-size step, not a tiny seed value
                sample(function, rng, temperature, basis).abs()
            }
        }
    }
}

fn resample_nonnegative<R: Rng>(
    function: &PerturbationFunction,
    rng: &mut R,
    temperature: f64,
    x: f64,
    basis: f64,
    mut p: f64,
) -> f64 {
    for _ in 0..MAX_RESAMPLES {
        if x + p >= 0.0 {
            return p;
        }
        p = sample(function, rng, temperature, basis);
    }
    if x + p >= 0.0 {
        p
    } else if x + p.abs() >= 0.0 {
        p.abs()
    } else {
        -x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::create_rng;

    const ALL_FUNCTIONS: [PerturbationFunction; 6] = [
        PerturbationFunction::Uniform { width: 0.001 },
        PerturbationFunction::Variable { multiplier: 1000.0 },
        PerturbationFunction::Gaussian { scale: 0.001 },
        PerturbationFunction::Tangent { scale: 0.001 },
        PerturbationFunction::PowerLaw { scale: 0.001 },
        PerturbationFunction::Exponential { scale: 0.001 },
    ];

    #[test]
    fn test_uniform_bounded() {
        let mut rng = create_rng(1);
        let f = PerturbationFunction::Uniform { width: 0.01 };
        for _ in 0..1000 {
            let p = sample(&f, &mut rng, 1.0, 0.0);
            assert!((-0.005..0.005).contains(&p), "uniform step {p} out of range");
        }
    }

    #[test]
    fn test_variable_uses_basis() {
        let mut rng = create_rng(2);
        let f = PerturbationFunction::Variable { multiplier: 1.0 };
        for _ in 0..1000 {
            let p = sample(&f, &mut rng, 1.0, 4.0);
            assert!(p.abs() <= 2.0);
            let p0 = sample(&f, &mut rng, 1.0, 0.0);
            assert!(p0.abs() <= ZERO_BASIS / 2.0);
        }
    }

    #[test]
    fn test_all_functions_finite_at_extreme_temperatures() {
        let mut rng = create_rng(3);
        for f in ALL_FUNCTIONS {
            for t in [1.0, 1e-6, 0.0, 1e-320] {
                for _ in 0..200 {
                    let p = sample(&f, &mut rng, t, 1.0);
                    assert!(p.is_finite(), "{f} gave {p} at T={t}");
                }
            }
        }
    }

    #[test]
    fn test_both_signs_produced() {
        let mut rng = create_rng(4);
        for f in ALL_FUNCTIONS {
            let steps: Vec<f64> = (0..500).map(|_| sample(&f, &mut rng, 0.5, 1.0)).collect();
            assert!(steps.iter().any(|&p| p > 0.0), "{f} never positive");
            assert!(steps.iter().any(|&p| p < 0.0), "{f} never negative");
        }
    }

    #[test]
    fn test_propose_never_negative() {
        let mut rng = create_rng(5);
        let policies = [
            NonnegativityConstraint::TryZeroOften,
            NonnegativityConstraint::LimitZero,
            NonnegativityConstraint::PreventZero,
        ];
        for f in ALL_FUNCTIONS {
            for policy in policies {
                for &x in &[0.0, 1e-9, 1e-4, 1.0] {
                    for _ in 0..200 {
                        let p = propose(&f, policy, &mut rng, 0.5, x, 1.0);
                        assert!(x + p >= 0.0, "{policy} with {f}: {x} + {p} < 0");
                    }
                }
            }
        }
    }

    #[test]
    fn test_try_zero_clips_to_exact_zero() {
        let mut rng = create_rng(6);
        let f = PerturbationFunction::Uniform { width: 10.0 };
        let mut clipped = 0;
        for _ in 0..200 {
            let p = propose(&f, NonnegativityConstraint::TryZeroOften, &mut rng, 1.0, 0.5, 0.0);
            if 0.5 + p == 0.0 {
                clipped += 1;
            }
        }
        assert!(clipped > 0, "large steps below zero should clip to zero");
    }

    #[test]
    fn test_prevent_zero_bounds_nonzero_moves() {
        let mut rng = create_rng(7);
        let f = PerturbationFunction::Uniform { width: 1e6 };
        for _ in 0..1000 {
            let p = propose(&f, NonnegativityConstraint::PreventZero, &mut rng, 1.0, 2.0, 0.0);
            assert!(p >= -2.0 && p < 2.0, "step {p} escapes (-x, x)");
        }
        for _ in 0..100 {
            let p = propose(&f, NonnegativityConstraint::PreventZero, &mut rng, 1.0, 0.0, 0.0);
            assert!(p >= 0.0);
        }
    }

    #[test]
    fn test_prevent_zero_lifts_zero_by_a_full_step() {
        let mut rng = create_rng(11);
        let f = PerturbationFunction::Uniform { width: 2.0 };
        let steps: Vec<f64> = (0..1000)
            .map(|_| propose(&f, NonnegativityConstraint::PreventZero, &mut rng, 1.0, 0.0, 0.0))
            .collect();
        assert!(steps.iter().all(|&p| (0.0..=1.0).contains(&p)));
        // |U(-1, 1)| has mean 0.5
        let mean = steps.iter().sum::<f64>() / steps.len() as f64;
        assert!((mean - 0.5).abs() < 0.05, "mean step {mean}");
    }
}
