//! Simulated Annealing (SA) core for sparse constrained least squares.
//!
//! One core owns a candidate solution `x >= 0` and minimizes
//! `|A·x − d|² + |max(A_ineq·x − d_ineq, 0)|² + w / S(x)` by perturbing a
//! single variable per iteration. Compressed-column storage makes each
//! evaluation O(nnz in one column): only the misfit rows touched by the
//! perturbed column are updated, and energy changes are accumulated from
//! those rows alone.
//!
//! # References
//!
//! - Kirkpatrick, Gelatt & Vecchi (1983), "Optimization by Simulated Annealing"
//! - Geman & Geman (1984), "Stochastic Relaxation, Gibbs Distributions, and
//!   the Bayesian Restoration of Images"
//! - Szu & Hartley (1987), "Fast Simulated Annealing"
//! - Ingber (1989), "Very Fast Simulated Re-annealing"

mod config;
mod energy;
mod perturb;
mod runner;
mod types;

pub use config::{CoolingSchedule, NonnegativityConstraint, PerturbationFunction, SaConfig};
pub use energy::{calculate_energy, entropy_sum, Energy, ENTROPY_CONSTANT};
pub use runner::SerialAnnealer;
pub use types::{count_non_zero, AnnealState, Annealer, BestState};
