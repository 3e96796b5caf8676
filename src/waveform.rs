//! External pressure forcing shared by every node

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

/// Far-field pressure perturbation as a function of time.
pub trait Forcing {
    fn pressure(&self, time: f64) -> f64;
}

impl<F> Forcing for F
where
    F: Fn(f64) -> f64,
{
    fn pressure(&self, time: f64) -> f64 {
        self(time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Waveform {
    Constant {
        amplitude: f64,
    },
    Sine {
        amplitude: f64,
        period: f64,
        #[serde(default)]
        phase: f64,
    },
}

impl Default for Waveform {
    fn default() -> Self {
        Self::Sine {
            amplitude: 0.1,
            period: 3.0,
            phase: 0.0,
        }
    }
}

impl Forcing for Waveform {
    fn pressure(&self, time: f64) -> f64 {
        match *self {
            Self::Constant { amplitude } => amplitude,
            Self::Sine {
                amplitude,
                period,
                phase,
            } => amplitude * (TAU * time / period + phase).sin(),
        }
    }
}
