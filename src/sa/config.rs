//! Annealing-core configuration: cooling schedules, perturbation functions
//! and nonnegativity policies.

use std::fmt;
use std::str::FromStr;

/// Cooling schedule mapping the (1-based) cooling iteration `i` to a
/// temperature `T`.
///
/// # References
///
/// - Classical: Geman & Geman (1984), convergence guaranteed but slow
/// - Fast: Szu & Hartley (1987)
/// - VeryFast: Ingber (1989)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoolingSchedule {
    /// `T = 1 / ln(i + 1)`.
    Classical,

    /// `T = 1 / i`.
    #[default]
    Fast,

    /// `T = exp(-(i - 1))`. Reaches zero to machine precision after a few
    /// hundred iterations.
    VeryFast,

    /// `T = 1 - i / iterations`, floored at zero.
    Linear {
        /// Cooling iterations until the temperature reaches zero.
        iterations: u64,
    },
}

impl CoolingSchedule {
    /// Default ramp length for [`CoolingSchedule::Linear`].
    pub const DEFAULT_LINEAR_ITERATIONS: u64 = 100_000;

    /// Temperature at cooling iteration `cool_iter` (1-based).
    pub fn temperature(&self, cool_iter: f64) -> f64 {
        match *self {
            CoolingSchedule::Classical => 1.0 / (cool_iter + 1.0).ln(),
            CoolingSchedule::Fast => 1.0 / cool_iter,
            CoolingSchedule::VeryFast => (-(cool_iter - 1.0)).exp(),
            CoolingSchedule::Linear { iterations } => {
                (1.0 - cool_iter / iterations as f64).max(0.0)
            }
        }
    }
}

impl fmt::Display for CoolingSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoolingSchedule::Classical => write!(f, "CLASSICAL_SA"),
            CoolingSchedule::Fast => write!(f, "FAST_SA"),
            CoolingSchedule::VeryFast => write!(f, "VERYFAST_SA"),
            CoolingSchedule::Linear { iterations } => write!(f, "LINEAR({iterations})"),
        }
    }
}

impl FromStr for CoolingSchedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "classical" | "classicalsa" => Ok(CoolingSchedule::Classical),
            "fast" | "fastsa" => Ok(CoolingSchedule::Fast),
            "veryfast" | "veryfastsa" => Ok(CoolingSchedule::VeryFast),
            "linear" => Ok(CoolingSchedule::Linear {
                iterations: Self::DEFAULT_LINEAR_ITERATIONS,
            }),
            _ => Err(format!(
                "unknown cooling schedule '{s}' (expected classical, fast, veryfast or linear)"
            )),
        }
    }
}

/// Distribution a candidate step for one variable is drawn from.
///
/// Each variant carries one scale parameter; [`PerturbationFunction::with_scale`]
/// replaces it. `Variable` multiplies a per-variable basis supplied with the
/// problem.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PerturbationFunction {
    /// `(r - 0.5) * width`, independent of temperature.
    Uniform { width: f64 },

    /// `(r - 0.5) * basis[j] * multiplier`; a zero basis entry uses `1e-8`.
    Variable { multiplier: f64 },

    /// `N(0, 1) * scale * sqrt(T)`.
    Gaussian { scale: f64 },

    /// Cauchy-like step: `T * scale * tan(pi * r - pi / 2)`.
    Tangent { scale: f64 },

    /// `sign(r - 0.5) * T * scale * ((1 + 1/T)^|2r - 1| - 1)`.
    PowerLaw { scale: f64 },

    /// `±10^r * T * scale` with a random sign.
    Exponential { scale: f64 },
}

impl Default for PerturbationFunction {
    fn default() -> Self {
        PerturbationFunction::Uniform { width: 0.0001 }
    }
}

impl PerturbationFunction {
    /// Returns the same function with its scale parameter replaced.
    pub fn with_scale(self, scale: f64) -> Self {
        match self {
            PerturbationFunction::Uniform { .. } => PerturbationFunction::Uniform { width: scale },
            PerturbationFunction::Variable { .. } => {
                PerturbationFunction::Variable { multiplier: scale }
            }
            PerturbationFunction::Gaussian { .. } => PerturbationFunction::Gaussian { scale },
            PerturbationFunction::Tangent { .. } => PerturbationFunction::Tangent { scale },
            PerturbationFunction::PowerLaw { .. } => PerturbationFunction::PowerLaw { scale },
            PerturbationFunction::Exponential { .. } => PerturbationFunction::Exponential { scale },
        }
    }

    /// The scale parameter.
    pub fn scale(&self) -> f64 {
        match *self {
            PerturbationFunction::Uniform { width } => width,
            PerturbationFunction::Variable { multiplier } => multiplier,
            PerturbationFunction::Gaussian { scale }
            | PerturbationFunction::Tangent { scale }
            | PerturbationFunction::PowerLaw { scale }
            | PerturbationFunction::Exponential { scale } => scale,
        }
    }

    /// Whether the step size depends on temperature.
    pub fn is_temperature_dependent(&self) -> bool {
        !matches!(
            self,
            PerturbationFunction::Uniform { .. } | PerturbationFunction::Variable { .. }
        )
    }
}

impl fmt::Display for PerturbationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PerturbationFunction::Uniform { .. } => "UNIFORM",
            PerturbationFunction::Variable { .. } => "VARIABLE",
            PerturbationFunction::Gaussian { .. } => "GAUSSIAN",
            PerturbationFunction::Tangent { .. } => "TANGENT",
            PerturbationFunction::PowerLaw { .. } => "POWER_LAW",
            PerturbationFunction::Exponential { .. } => "EXPONENTIAL",
        };
        write!(f, "{name}({})", self.scale())
    }
}

impl FromStr for PerturbationFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "uniform" => Ok(PerturbationFunction::default()),
            "variable" => Ok(PerturbationFunction::Variable { multiplier: 1000.0 }),
            "gaussian" => Ok(PerturbationFunction::Gaussian { scale: 0.0001 }),
            "tangent" | "cauchy" => Ok(PerturbationFunction::Tangent { scale: 0.001 }),
            "powerlaw" => Ok(PerturbationFunction::PowerLaw { scale: 0.001 }),
            "exponential" => Ok(PerturbationFunction::Exponential { scale: 0.001 }),
            _ => Err(format!(
                "unknown perturbation function '{s}' (expected uniform, variable, gaussian, \
                 tangent, power_law or exponential)"
            )),
        }
    }
}

/// How a perturbation is reconciled with the `x >= 0` domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NonnegativityConstraint {
    /// A zero variable is resampled until non-negative; a nonzero variable
    /// that would go negative is clipped to exactly zero.
    TryZeroOften,

    /// Always resample until non-negative.
    #[default]
    LimitZero,

    /// Nonzero variables move within `(-x, x)`. A zero variable moves up by
    /// the absolute value of a regular draw from the perturbation function,
    /// so its step is bounded only by that function, and the move is always
    /// accepted.
    PreventZero,
}

impl fmt::Display for NonnegativityConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NonnegativityConstraint::TryZeroOften => "TRY_ZERO_RATES_OFTEN",
            NonnegativityConstraint::LimitZero => "LIMIT_ZERO_RATES",
            NonnegativityConstraint::PreventZero => "PREVENT_ZERO_RATES",
        };
        f.write_str(name)
    }
}

impl FromStr for NonnegativityConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "tryzero" | "tryzerooften" | "tryzeroratesoften" => {
                Ok(NonnegativityConstraint::TryZeroOften)
            }
            "limitzero" | "limitzerorates" => Ok(NonnegativityConstraint::LimitZero),
            "preventzero" | "preventzerorates" => Ok(NonnegativityConstraint::PreventZero),
            _ => Err(format!(
                "unknown nonnegativity constraint '{s}' (expected try_zero, limit_zero or prevent_zero)"
            )),
        }
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Configuration for one annealing core.
///
/// # Examples
///
/// ```
/// use u_annealing::sa::{CoolingSchedule, NonnegativityConstraint, SaConfig};
///
/// let config = SaConfig::default()
///     .with_cooling(CoolingSchedule::Classical)
///     .with_slowdown(10)
///     .with_nonnegativity(NonnegativityConstraint::TryZeroOften)
///     .with_seed(7);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SaConfig {
    pub cooling: CoolingSchedule,

    /// Divides the iteration count before it reaches the cooling schedule:
    /// `i_cool = (i - 1) / slowdown + 1`.
    pub slowdown: u64,

    pub perturbation: PerturbationFunction,

    pub nonnegativity: NonnegativityConstraint,

    /// Multiplies the energy change in the Metropolis exponent.
    pub energy_scale: f64,

    /// Treat every accepted state as the new best, regardless of energy.
    pub keep_current_as_best: bool,

    /// Random seed for reproducibility.
    pub seed: Option<u64>,
}

impl Default for SaConfig {
    fn default() -> Self {
        Self {
            cooling: CoolingSchedule::default(),
            slowdown: 1,
            perturbation: PerturbationFunction::default(),
            nonnegativity: NonnegativityConstraint::default(),
            energy_scale: 1.0,
            keep_current_as_best: false,
            seed: None,
        }
    }
}

impl SaConfig {
    pub fn with_cooling(mut self, cooling: CoolingSchedule) -> Self {
        self.cooling = cooling;
        self
    }

    pub fn with_slowdown(mut self, slowdown: u64) -> Self {
        self.slowdown = slowdown;
        self
    }

    pub fn with_perturbation(mut self, perturbation: PerturbationFunction) -> Self {
        self.perturbation = perturbation;
        self
    }

    pub fn with_nonnegativity(mut self, nonnegativity: NonnegativityConstraint) -> Self {
        self.nonnegativity = nonnegativity;
        self
    }

    pub fn with_energy_scale(mut self, scale: f64) -> Self {
        self.energy_scale = scale;
        self
    }

    pub fn with_keep_current_as_best(mut self, keep: bool) -> Self {
        self.keep_current_as_best = keep;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Temperature at global iteration `iteration` (1-based), after slowdown.
    pub fn temperature(&self, iteration: u64) -> f64 {
        let cool_iter = if self.slowdown == 1 {
            iteration as f64
        } else {
            (iteration as f64 - 1.0) / self.slowdown as f64 + 1.0
        };
        self.cooling.temperature(cool_iter)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.slowdown == 0 {
            return Err("cooling slowdown must be at least 1".into());
        }
        if !self.energy_scale.is_finite() || self.energy_scale <= 0.0 {
            return Err(format!(
                "energy scale must be positive, got {}",
                self.energy_scale
            ));
        }
        if let CoolingSchedule::Linear { iterations } = self.cooling {
            if iterations == 0 {
                return Err("linear cooling needs a positive iteration count".into());
            }
        }
        let scale = self.perturbation.scale();
        if !scale.is_finite() || scale <= 0.0 {
            return Err(format!("perturbation scale must be positive, got {scale}"));
        }
        Ok(())
    }
}
