//! Energy vector and its full (slow-path) computation.
//!
//! The energy vector is laid out as
//! `[total, equality, entropy, inequality, range_0, range_1, ...]`.

use crate::data::ConstraintRange;
use crate::error::{AnnealError, Result};
use tracing::warn;

/// Scaling constant inside the entropy sum.
pub const ENTROPY_CONSTANT: f64 = 500.0;

/// Substituted for an entropy sum of exactly zero.
const ZERO_ENTROPY_FLOOR: f64 = 1e-4;

const TOTAL: usize = 0;
const EQUALITY: usize = 1;
const ENTROPY: usize = 2;
const INEQUALITY: usize = 3;
const RANGES: usize = 4;

/// Energy breakdown of one solution. Lower is better.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Energy(Vec<f64>);

impl Energy {
    /// Builds an energy vector from its aggregate components; `total` is derived.
    pub fn from_components(equality: f64, entropy: f64, inequality: f64, ranges: &[f64]) -> Self {
        let mut v = Vec::with_capacity(RANGES + ranges.len());
        v.extend_from_slice(&[equality + entropy + inequality, equality, entropy, inequality]);
        v.extend_from_slice(ranges);
        Energy(v)
    }

    /// Wraps a raw vector. Must hold at least the four aggregate entries.
    pub fn from_vec(values: Vec<f64>) -> Result<Self> {
        if values.len() < RANGES {
            return Err(AnnealError::config(format!(
                "energy vector needs at least {RANGES} entries, got {}",
                values.len()
            )));
        }
        Ok(Energy(values))
    }

    /// An all-infinite energy with room for `num_ranges` range entries.
    pub fn worst(num_ranges: usize) -> Self {
        Energy(vec![f64::INFINITY; RANGES + num_ranges])
    }

    pub fn total(&self) -> f64 {
        self.0[TOTAL]
    }

    pub fn equality(&self) -> f64 {
        self.0[EQUALITY]
    }

    pub fn entropy(&self) -> f64 {
        self.0[ENTROPY]
    }

    pub fn inequality(&self) -> f64 {
        self.0[INEQUALITY]
    }

    /// Per-range sub-sums, in range order.
    pub fn ranges(&self) -> &[f64] {
        &self.0[RANGES..]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrites the aggregate components, leaving range entries untouched.
    pub(crate) fn set_components(&mut self, equality: f64, entropy: f64, inequality: f64) {
        self.0[TOTAL] = equality + entropy + inequality;
        self.0[EQUALITY] = equality;
        self.0[ENTROPY] = entropy;
        self.0[INEQUALITY] = inequality;
    }

    /// Coordinate-wise `self += weight * other`. Lengths must match.
    pub(crate) fn add_scaled(&mut self, other: &Energy, weight: f64) {
        for (a, &b) in self.0.iter_mut().zip(&other.0) {
            *a = b.mul_add(weight, *a);
        }
    }

    pub(crate) fn zeros(len: usize) -> Self {
        Energy(vec![0.0; len])
    }
}

impl std::fmt::Display for Energy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={:.6e} eq={:.6e} entropy={:.6e} ineq={:.6e}",
            self.total(),
            self.equality(),
            self.entropy(),
            self.inequality()
        )
    }
}

/// Entropy contribution of a single variable: `-c·x·ln(c·x)` for `x > 0`.
#[inline]
pub fn entropy_term(x: f64) -> f64 {
    if x > 0.0 {
        let cx = ENTROPY_CONSTANT * x;
        -cx * cx.ln()
    } else {
        0.0
    }
}

/// Entropy sum over the whole solution.
pub fn entropy_sum(x: &[f64]) -> f64 {
    x.iter().map(|&v| entropy_term(v)).sum()
}

/// Converts an entropy sum into the regularizer energy `weight / S`.
///
/// A zero sum is replaced by a small positive floor; a negative sum is an
/// error. Returns zero when the weight is zero.
#[inline]
pub fn entropy_energy(weight: f64, sum: f64) -> Result<f64> {
    if weight <= 0.0 {
        return Ok(0.0);
    }
    let sum = if sum == 0.0 { ZERO_ENTROPY_FLOOR } else { sum };
    if sum < 0.0 {
        return Err(AnnealError::NegativeEntropy(sum));
    }
    let energy = weight / sum;
    if energy.is_nan() {
        return Err(AnnealError::InvalidEnergy {
            component: "entropy",
            value: energy,
        });
    }
    Ok(energy)
}

/// Sum of squared equality misfits.
#[inline]
pub fn equality_energy(misfit: &[f64]) -> f64 {
    misfit.iter().fold(0.0, |acc, &m| m.mul_add(m, acc))
}

/// Sum of squared positive inequality misfits.
#[inline]
pub fn inequality_energy(misfit_ineq: &[f64]) -> f64 {
    misfit_ineq
        .iter()
        .filter(|&&m| m > 0.0)
        .fold(0.0, |acc, &m| m.mul_add(m, acc))
}

/// Full energy computation for a solution and its misfits.
///
/// Every range collects the squared misfits of the rows it contains: equality
/// ranges from equality rows, inequality ranges from positive inequality
/// misfits. Rows outside every range still count towards the aggregates.
pub fn calculate_energy(
    x: &[f64],
    misfit: &[f64],
    misfit_ineq: Option<&[f64]>,
    ranges: &[ConstraintRange],
    entropy_weight: f64,
) -> Result<Energy> {
    let mut range_sums = vec![0.0; ranges.len()];

    let equality = if ranges.is_empty() {
        equality_energy(misfit)
    } else {
        let mut sum = 0.0;
        for (row, &m) in misfit.iter().enumerate() {
            let val = m * m;
            sum += val;
            for (j, range) in ranges.iter().enumerate() {
                if range.contains_in(row, false) {
                    range_sums[j] += val;
                }
            }
        }
        sum
    };
    check("equality", equality)?;

    let entropy = if entropy_weight > 0.0 {
        let sum = entropy_sum(x);
        if sum == 0.0 {
            warn!("total entropy is zero, substituting {ZERO_ENTROPY_FLOOR}");
        }
        entropy_energy(entropy_weight, sum)?
    } else {
        0.0
    };

    let inequality = match misfit_ineq {
        None => 0.0,
        Some(misfit_ineq) if ranges.is_empty() => inequality_energy(misfit_ineq),
        Some(misfit_ineq) => {
            let mut sum = 0.0;
            for (row, &m) in misfit_ineq.iter().enumerate() {
                if m > 0.0 {
                    let val = m * m;
                    sum += val;
                    for (j, range) in ranges.iter().enumerate() {
                        if range.contains_in(row, true) {
                            range_sums[j] += val;
                        }
                    }
                }
            }
            sum
        }
    };
    check("inequality", inequality)?;

    let energy = Energy::from_components(equality, entropy, inequality, &range_sums);
    check("total", energy.total())?;
    Ok(energy)
}

/// Rejects NaN and negative energies.
pub(crate) fn check(component: &'static str, value: f64) -> Result<()> {
    if value.is_nan() || value < 0.0 {
        return Err(AnnealError::InvalidEnergy { component, value });
    }
    Ok(())
}
