//! Constraint systems and the full inversion problem.

use super::range::ConstraintRange;
use crate::error::{AnnealError, Result};
use sprs::{CsMat, TriMat};

/// Builds a compressed-column matrix from `(row, col, value)` triplets.
///
/// Duplicate entries are summed and entries that end up exactly zero are
/// not stored.
pub fn csc_from_triplets(
    nrows: usize,
    ncols: usize,
    triplets: &[(usize, usize, f64)],
) -> Result<CsMat<f64>> {
    let mut tri = TriMat::new((nrows, ncols));
    for &(row, col, value) in triplets {
        if row >= nrows || col >= ncols {
            return Err(AnnealError::config(format!(
                "triplet ({row}, {col}) outside {nrows}x{ncols} matrix"
            )));
        }
        if !value.is_finite() {
            return Err(AnnealError::config(format!(
                "non-finite value {value} at ({row}, {col})"
            )));
        }
        if value != 0.0 {
            tri.add_triplet(row, col, value);
        }
    }
    let a: CsMat<f64> = tri.to_csc();
    if !a.data().contains(&0.0) {
        return Ok(a);
    }

    // duplicates that cancelled out
    let mut kept = TriMat::new((nrows, ncols));
    for (col, column) in a.outer_iterator().enumerate() {
        for (row, &value) in column.iter() {
            if value != 0.0 {
                kept.add_triplet(row, col, value);
            }
        }
    }
    Ok(kept.to_csc())
}

/// Builds a compressed-column matrix from dense rows of equal length.
pub fn csc_from_dense(rows: &[Vec<f64>]) -> Result<CsMat<f64>> {
    let ncols = rows.first().map_or(0, Vec::len);
    let mut triplets = Vec::new();
    for (r, row) in rows.iter().enumerate() {
        if row.len() != ncols {
            return Err(AnnealError::config(format!(
                "ragged dense matrix: row {r} has {} columns, expected {ncols}",
                row.len()
            )));
        }
        triplets.extend(row.iter().enumerate().map(|(c, &v)| (r, c, v)));
    }
    csc_from_triplets(rows.len(), ncols, &triplets)
}

/// One linear system `A·x ≈ d`. `a` is always stored column-major.
#[derive(Debug, Clone)]
pub struct ConstraintData {
    pub a: CsMat<f64>,
    pub d: Vec<f64>,
}

impl ConstraintData {
    /// Pairs a matrix with its data vector, checking `A.rows() == d.len()`.
    pub fn new(a: CsMat<f64>, d: Vec<f64>) -> Result<Self> {
        if a.rows() != d.len() {
            return Err(AnnealError::config(format!(
                "matrix has {} rows but data vector has length {}",
                a.rows(),
                d.len()
            )));
        }
        let a = if a.is_csc() { a } else { a.to_csc() };
        if let Some(i) = d.iter().position(|v| !v.is_finite()) {
            return Err(AnnealError::config(format!(
                "data vector entry {i} is not finite: {}",
                d[i]
            )));
        }
        Ok(Self { a, d })
    }

    pub fn nrows(&self) -> usize {
        self.d.len()
    }

    pub fn ncols(&self) -> usize {
        self.a.cols()
    }

    /// Row indices and values stored for column `col`.
    #[inline]
    pub fn column(&self, col: usize) -> (&[usize], &[f64]) {
        let indptr = self.a.indptr();
        let ptr = indptr.raw_storage();
        let (start, end) = (ptr[col], ptr[col + 1]);
        (&self.a.indices()[start..end], &self.a.data()[start..end])
    }

    /// Full misfit `A·x − d` written into `out`.
    pub fn calculate_misfit(&self, x: &[f64], out: &mut [f64]) {
        let out = &mut out[..self.d.len()];
        out.fill(0.0);
        sprs::prod::mul_acc_mat_vec_csc(self.a.view(), x, &mut *out);
        for (m, &d) in out.iter_mut().zip(&self.d) {
            *m -= d;
        }
    }

    /// Full misfit `A·x − d`.
    pub fn misfit(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.nrows()];
        self.calculate_misfit(x, &mut out);
        out
    }
}

/// Everything an annealing core needs: the equality system, an optional
/// inequality system, the starting solution and the regularization knobs.
///
/// Immutable once built. Cores share it through an `Arc`.
#[derive(Debug, Clone)]
pub struct InversionProblem {
    equality: ConstraintData,
    inequality: Option<ConstraintData>,
    initial: Vec<f64>,
    entropy_weight: f64,
    perturbation_basis: Option<Vec<f64>>,
    ranges: Vec<ConstraintRange>,
}

impl InversionProblem {
    /// Creates a problem with no inequality system, no entropy term and no ranges.
    pub fn new(equality: ConstraintData, initial: Vec<f64>) -> Result<Self> {
        let problem = Self {
            equality,
            inequality: None,
            initial,
            entropy_weight: 0.0,
            perturbation_basis: None,
            ranges: Vec::new(),
        };
        problem.validate()?;
        Ok(problem)
    }

    pub fn with_inequality(mut self, inequality: ConstraintData) -> Result<Self> {
        self.inequality = Some(inequality);
        self.validate()?;
        Ok(self)
    }

    /// Sets the entropy regularization weight (`0` disables the term).
    pub fn with_entropy_weight(mut self, weight: f64) -> Result<Self> {
        self.entropy_weight = weight;
        self.validate()?;
        Ok(self)
    }

    /// Sets the per-variable scale used by the variable perturbation function.
    pub fn with_perturbation_basis(mut self, basis: Vec<f64>) -> Result<Self> {
        self.perturbation_basis = Some(basis);
        self.validate()?;
        Ok(self)
    }

    pub fn with_ranges(mut self, ranges: Vec<ConstraintRange>) -> Result<Self> {
        self.ranges = ranges;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let ncols = self.equality.ncols();
        if self.initial.len() != ncols {
            return Err(AnnealError::config(format!(
                "initial solution has length {} but matrix has {ncols} columns",
                self.initial.len()
            )));
        }
        if let Some(i) = self.initial.iter().position(|&v| !v.is_finite() || v < 0.0) {
            return Err(AnnealError::config(format!(
                "initial solution entry {i} must be finite and non-negative, got {}",
                self.initial[i]
            )));
        }
        if let Some(ineq) = &self.inequality {
            if ineq.ncols() != ncols {
                return Err(AnnealError::config(format!(
                    "inequality matrix has {} columns, expected {ncols}",
                    ineq.ncols()
                )));
            }
        }
        if !self.entropy_weight.is_finite() || self.entropy_weight < 0.0 {
            return Err(AnnealError::config(format!(
                "entropy weight must be finite and non-negative, got {}",
                self.entropy_weight
            )));
        }
        if let Some(basis) = &self.perturbation_basis {
            if basis.len() != ncols {
                return Err(AnnealError::config(format!(
                    "perturbation basis has length {} but matrix has {ncols} columns",
                    basis.len()
                )));
            }
        }
        for range in &self.ranges {
            let rows = if range.inequality {
                match &self.inequality {
                    Some(ineq) => ineq.nrows(),
                    None => {
                        return Err(AnnealError::config(format!(
                            "range {range} targets the inequality system, which is absent"
                        )))
                    }
                }
            } else {
                self.equality.nrows()
            };
            if range.start_row > range.end_row || range.end_row > rows {
                return Err(AnnealError::config(format!(
                    "range {range} is outside the {rows} available rows"
                )));
            }
        }
        Ok(())
    }

    pub fn equality(&self) -> &ConstraintData {
        &self.equality
    }

    pub fn inequality(&self) -> Option<&ConstraintData> {
        self.inequality.as_ref()
    }

    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    pub fn entropy_weight(&self) -> f64 {
        self.entropy_weight
    }

    pub fn perturbation_basis(&self) -> Option<&[f64]> {
        self.perturbation_basis.as_deref()
    }

    pub fn ranges(&self) -> &[ConstraintRange] {
        &self.ranges
    }

    /// Number of free variables.
    pub fn num_vars(&self) -> usize {
        self.initial.len()
    }

    /// Length of the energy vector: four aggregate components plus one per range.
    pub fn energy_len(&self) -> usize {
        4 + self.ranges.len()
    }
}
