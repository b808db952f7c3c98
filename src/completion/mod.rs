//! Completion criteria: predicates deciding when annealing stops.
//!
//! The annealing engine treats criteria as opaque predicates over an
//! [`AnnealState`]. This module ships the implementations a driver needs:
//! iteration and wall-time budgets, absolute energy targets, an
//! energy-improvement-rate stop, a compound "stop when any is met"
//! combinator, a progress-logging wrapper, and the per-round
//! [`SubCompletion`] budgets used by the coordinators.

mod criteria;
mod progress;
mod sub;

pub use criteria::{
    CompoundCompletion, EnergyChangeCompletion, EnergyCompletion, IterationCompletion,
    TimeCompletion,
};
pub use progress::{ProgressSnapshot, ProgressTracking};
pub use sub::{format_duration, parse_duration, SubCompletion};

use crate::sa::AnnealState;
use std::sync::Arc;

/// Decides whether annealing should stop.
///
/// Implementations must be side-effect free with respect to the decision:
/// the distributed coordinator evaluates the top-level criteria on rank 0
/// only.
pub trait CompletionCriteria: Send + Sync + std::fmt::Debug {
    fn is_satisfied(&self, state: &AnnealState) -> bool;

    /// Fraction of the run completed, in `[0, 1]`, if the criteria can tell.
    fn estimate_fraction_completed(&self, _state: &AnnealState) -> Option<f64> {
        None
    }
}

impl<C: CompletionCriteria + ?Sized> CompletionCriteria for Box<C> {
    fn is_satisfied(&self, state: &AnnealState) -> bool {
        (**self).is_satisfied(state)
    }

    fn estimate_fraction_completed(&self, state: &AnnealState) -> Option<f64> {
        (**self).estimate_fraction_completed(state)
    }
}

impl<C: CompletionCriteria + ?Sized> CompletionCriteria for Arc<C> {
    fn is_satisfied(&self, state: &AnnealState) -> bool {
        (**self).is_satisfied(state)
    }

    fn estimate_fraction_completed(&self, state: &AnnealState) -> Option<f64> {
        (**self).estimate_fraction_completed(state)
    }
}
