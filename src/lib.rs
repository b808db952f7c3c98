//! Simulated annealing inversion engine for large sparse constrained
//! least-squares problems.
//!
//! Finds a nonnegative solution `x` minimizing a weighted sum of squared
//! misfits of an equality system `A·x ≈ d`, one-sided penalties of an
//! inequality system `A_ineq·x ≤ d_ineq`, and an optional entropy
//! regularizer:
//!
//! - **Annealing core** ([`sa`]): single-variable perturbation with
//!   incrementally maintained misfits, pluggable cooling schedules,
//!   perturbation functions and nonnegativity policies.
//! - **Threaded coordinator** ([`threaded`]): rounds of independent cores on
//!   a rayon pool, merged by best-of or by averaging.
//! - **Distributed coordinator** ([`distributed`]): the same round structure
//!   across processes, with broadcast and gather collectives.
//! - **Completion criteria** ([`completion`]): stop conditions and
//!   per-round budgets.
//! - **Persistence** ([`io`]): binary vectors and matrices, zip input
//!   bundles, solution and metadata output.
//!
//! # Architecture
//!
//! Problem data ([`data`]) is validated once and shared read-only through
//! `Arc`. Every coordinator implements [`sa::Annealer`], so a distributed
//! rank can wrap a threaded coordinator, which wraps serial cores.

pub mod completion;
pub mod data;
pub mod distributed;
pub mod error;
pub mod io;
pub mod random;
pub mod sa;
pub mod threaded;

pub use error::{AnnealError, Result};
