//! Initial-radius distributions
//!
//! Densities follow the parameterization the population configuration uses:
//! `sigR0` is the shape (lognormal) or standard deviation (normal) and
//! `muR0` locates the distribution.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::PopulationError;

/// Shape of the initial-radius distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Lognormal,
    Normal,
}

impl Default for Shape {
    fn default() -> Self {
        Self::Lognormal
    }
}

impl Shape {
    pub fn name(self) -> &'static str {
        match self {
            Self::Lognormal => "lognormal",
            Self::Normal => "normal",
        }
    }

    /// Probability density at `x`.
    ///
    /// The lognormal density has unit scale, shape `scale`, and is shifted
    /// right by `ln(loc)`; it vanishes at and left of the shift.
    pub fn pdf(self, x: f64, loc: f64, scale: f64) -> f64 {
        match self {
            Self::Lognormal => {
                let y = x - loc.ln();
                if y <= 0.0 {
                    return 0.0;
                }
                let log_y = y.ln();
                (-log_y * log_y / (2.0 * scale * scale)).exp() / (y * scale * (2.0 * PI).sqrt())
            }
            Self::Normal => {
                let z = (x - loc) / scale;
                (-0.5 * z * z).exp() / (scale * (2.0 * PI).sqrt())
            }
        }
    }
}

/// Empirical support envelope `[a, b]` for a distribution of width `scale`
/// centered near `loc`.
pub fn support_bounds(loc: f64, scale: f64) -> Result<(f64, f64), PopulationError> {
    let a = 0.8 * (-2.8 * scale).exp() + (loc - 1.0);
    let b = 0.2 * (9.5 * scale).exp() + 1.0 + (loc - 1.0);
    if a <= 0.0 {
        return Err(PopulationError::InvalidSupport { lower: a });
    }
    Ok((a, b))
}
