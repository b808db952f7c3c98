//! Problem data: sparse matrices, constraint systems and row ranges.

mod constraint;
mod range;

pub use constraint::{csc_from_dense, csc_from_triplets, ConstraintData, InversionProblem};
pub use range::ConstraintRange;
