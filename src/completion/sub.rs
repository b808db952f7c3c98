//! Per-round budgets for the coordinators.

use super::{CompletionCriteria, IterationCompletion, TimeCompletion};
use crate::sa::AnnealState;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How long each worker runs in one coordinator round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubCompletion {
    /// Run this many more iterations past the round's start.
    Iterations(u64),
    /// Run for this much more wall time.
    Time(Duration),
    /// Round length shrinks linearly from `max` to `min` as the top-level
    /// criteria reports progress. Falls back to `max` when the top-level
    /// criteria cannot estimate its progress.
    VariableTime { max: Duration, min: Duration },
}

impl SubCompletion {
    /// Builds the concrete criteria for a round starting at `start`.
    ///
    /// `fraction` is the top-level criteria's completed fraction, if known.
    pub fn for_round(
        &self,
        start: &AnnealState,
        fraction: Option<f64>,
    ) -> Box<dyn CompletionCriteria> {
        match *self {
            SubCompletion::Iterations(n) => {
                Box::new(IterationCompletion::new(start.iterations.saturating_add(n)))
            }
            SubCompletion::Time(d) => Box::new(TimeCompletion::new(start.elapsed + d)),
            SubCompletion::VariableTime { max, min } => {
                let d = variable_round_time(max, min, fraction);
                Box::new(TimeCompletion::new(start.elapsed + d))
            }
        }
    }
}

fn variable_round_time(max: Duration, min: Duration, fraction: Option<f64>) -> Duration {
    match fraction {
        Some(f) if f.is_finite() => {
            let f = f.clamp(0.0, 1.0);
            let span = max.saturating_sub(min).as_secs_f64();
            max.saturating_sub(Duration::from_secs_f64(span * f))
        }
        _ => max,
    }
}

impl fmt::Display for SubCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubCompletion::Iterations(n) => write!(f, "{n} iterations"),
            SubCompletion::Time(d) => write!(f, "{d:?}"),
            SubCompletion::VariableTime { max, min } => write!(f, "{max:?} down to {min:?}"),
        }
    }
}

impl FromStr for SubCompletion {
    type Err = String;

    /// Accepts `N` (iterations), a time string, or `<max>,<min>` times.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((max, min)) = s.split_once(',') {
            let max = parse_duration(max)?;
            let min = parse_duration(min)?;
            if max < min {
                return Err(format!("max must be at least min in '{s}'"));
            }
            return Ok(SubCompletion::VariableTime { max, min });
        }
        if s.ends_with(|c: char| c.is_ascii_alphabetic()) {
            return parse_duration(s).map(SubCompletion::Time);
        }
        let n: u64 = s
            .parse()
            .map_err(|e| format!("bad sub-completion iteration count '{s}': {e}"))?;
        if n == 0 {
            return Err("sub-completion iteration count must be positive".into());
        }
        Ok(SubCompletion::Iterations(n))
    }
}

/// Parses a duration: `250ms`, `90s`, `5m` (or `5mi`), `2h`, or a bare
/// millisecond count. Fractional values are allowed with a suffix.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_ascii_lowercase();
    let (number, unit_millis) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix("mi") {
        (n, 60_000.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        let millis: u64 = s
            .parse()
            .map_err(|e| format!("bad time '{s}': {e}"))?;
        return Ok(Duration::from_millis(millis));
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|e| format!("bad time '{s}': {e}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("time must be non-negative, got '{s}'"));
    }
    Ok(Duration::from_secs_f64(value * unit_millis / 1000.0))
}

/// Formats a duration in the largest unit that divides it exactly, in the
/// same forms [`parse_duration`] accepts.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis == 0 {
        return "0ms".into();
    }
    for (unit, suffix) in [(3_600_000, "h"), (60_000, "m"), (1_000, "s")] {
        if millis % unit == 0 {
            return format!("{}{suffix}", millis / unit);
        }
    }
    format!("{millis}ms")
}
