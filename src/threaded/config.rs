//! Threaded coordinator configuration.
//!
//! [`ThreadedConfig`] controls how many annealing cores run side by side,
//! how long each round lasts and how the cores' results are merged.

use crate::completion::SubCompletion;
use std::path::PathBuf;
use std::time::Duration;

/// Periodic checkpoint of the best solution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Checkpoint {
    /// Wall time between checkpoint writes.
    pub interval: Duration,
    /// Path prefix; files are named `<prefix>_checkpoint_<time>.bin`.
    pub prefix: PathBuf,
}

/// Configuration for [`ThreadedAnnealer`](super::ThreadedAnnealer).
///
/// # Builder Pattern
///
/// ```
/// use std::time::Duration;
/// use u_annealing::completion::SubCompletion;
/// use u_annealing::threaded::ThreadedConfig;
///
/// let config = ThreadedConfig::default()
///     .with_threads(4)
///     .with_sub_completion(SubCompletion::Time(Duration::from_secs(1)))
///     .with_average(true)
///     .with_seed(7);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreadedConfig {
    /// Number of annealing cores (and pool threads).
    pub threads: usize,

    /// Budget of one round on every core.
    pub sub_completion: SubCompletion,

    /// Merge by coordinate-wise mean instead of picking the best core.
    pub average: bool,

    /// Start every round's cores at iteration zero, so an iteration
    /// sub-completion counts from zero rather than the running total.
    pub start_sub_iterations_at_zero: bool,

    /// Optional periodic checkpoint.
    pub checkpoint: Option<Checkpoint>,

    /// Master seed from which per-core seeds are derived.
    pub seed: Option<u64>,
}

impl Default for ThreadedConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            sub_completion: SubCompletion::Iterations(10_000),
            average: false,
            start_sub_iterations_at_zero: false,
            checkpoint: None,
            seed: None,
        }
    }
}

impl ThreadedConfig {
    pub fn with_threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    pub fn with_sub_completion(mut self, sub: SubCompletion) -> Self {
        self.sub_completion = sub;
        self
    }

    pub fn with_average(mut self, average: bool) -> Self {
        self.average = average;
        self
    }

    pub fn with_start_sub_iterations_at_zero(mut self, at_zero: bool) -> Self {
        self.start_sub_iterations_at_zero = at_zero;
        self
    }

    pub fn with_checkpoint(mut self, interval: Duration, prefix: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(Checkpoint {
            interval,
            prefix: prefix.into(),
        });
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads == 0 {
            return Err("threads must be at least 1".into());
        }
        match self.sub_completion {
            SubCompletion::Iterations(0) => {
                return Err("sub-completion iterations must be positive".into())
            }
            SubCompletion::VariableTime { max, min } if max < min => {
                return Err("variable sub-completion max must be at least min".into())
            }
            _ => {}
        }
        if let Some(c) = &self.checkpoint {
            if c.interval.is_zero() {
                return Err("checkpoint interval must be positive".into());
            }
            if c.prefix.as_os_str().is_empty() {
                return Err("checkpoint prefix must not be empty".into());
            }
        }
        Ok(())
    }
}

/// Parses a thread count: `N` or `N%` of the available hardware threads.
///
/// A percentage rounds to the nearest whole thread and never yields fewer
/// than one.
pub fn parse_threads(s: &str, available: usize) -> Result<usize, String> {
    let s = s.trim();
    if let Some(pct) = s.strip_suffix('%') {
        let pct: f64 = pct
            .trim()
            .parse()
            .map_err(|e| format!("bad thread percentage '{s}': {e}"))?;
        if !pct.is_finite() || pct <= 0.0 {
            return Err(format!("thread percentage must be positive, got '{s}'"));
        }
        let n = (available as f64 * pct * 0.01 + 0.5) as usize;
        return Ok(n.max(1));
    }
    let n: usize = s
        .parse()
        .map_err(|e| format!("bad thread count '{s}': {e}"))?;
    if n == 0 {
        return Err("thread count must be at least 1".into());
    }
    Ok(n)
}
