//! Single-bubble dynamics
//!
//! `BubbleModel` is the contract every per-node model satisfies. A model
//! never stores its own state: the ensemble owns the state table and hands
//! each model a read-only view of its row when a derivative is needed.

use ndarray::{array, Array1, ArrayView1};

/// Polytropic index of the bubble contents
pub const DEFAULT_POLYTROPIC_INDEX: f64 = 1.4;

pub trait BubbleModel {
    /// Length of the state vector, fixed for the life of the model.
    fn state_dim(&self) -> usize;

    /// State the node starts from.
    fn initial_state(&self) -> Array1<f64>;

    /// Time derivative of `state` under far-field pressure perturbation `pressure`.
    fn derivative(&self, state: ArrayView1<'_, f64>, pressure: f64) -> Array1<f64>;
}

impl<M: BubbleModel + ?Sized> BubbleModel for Box<M> {
    fn state_dim(&self) -> usize {
        (**self).state_dim()
    }

    fn initial_state(&self) -> Array1<f64> {
        (**self).initial_state()
    }

    fn derivative(&self, state: ArrayView1<'_, f64>, pressure: f64) -> Array1<f64> {
        (**self).derivative(state, pressure)
    }
}

/// Model whose state never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroModel {
    initial: Array1<f64>,
}

impl ZeroModel {
    pub fn new(initial: Array1<f64>) -> Self {
        Self { initial }
    }

    /// `[r0, 0]`, the resting state of a bubble of radius `r0`.
    pub fn at_rest(r0: f64) -> Self {
        Self::new(array![r0, 0.0])
    }
}

impl BubbleModel for ZeroModel {
    fn state_dim(&self) -> usize {
        self.initial.len()
    }

    fn initial_state(&self) -> Array1<f64> {
        self.initial.clone()
    }

    fn derivative(&self, state: ArrayView1<'_, f64>, _pressure: f64) -> Array1<f64> {
        Array1::zeros(state.len())
    }
}

/// Built-in bubble dynamics in dimensionless form: ambient pressure, liquid
/// density and reference radius are all one. State is `[R, dR/dt]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BubbleDynamics {
    /// Small-amplitude oscillator linearized about `r0`
    Linear { r0: f64, kappa: f64, damping: f64 },
    /// Inviscid Rayleigh-Plesset equation with polytropic gas, no surface tension
    RayleighPlesset { r0: f64, kappa: f64 },
}

impl BubbleDynamics {
    pub fn linear(r0: f64) -> Self {
        Self::Linear {
            r0,
            kappa: DEFAULT_POLYTROPIC_INDEX,
            damping: 0.0,
        }
    }

    pub fn rayleigh_plesset(r0: f64) -> Self {
        Self::RayleighPlesset {
            r0,
            kappa: DEFAULT_POLYTROPIC_INDEX,
        }
    }

    pub fn equilibrium_radius(&self) -> f64 {
        match *self {
            Self::Linear { r0, .. } | Self::RayleighPlesset { r0, .. } => r0,
        }
    }
}

impl BubbleModel for BubbleDynamics {
    fn state_dim(&self) -> usize {
        2
    }

    fn initial_state(&self) -> Array1<f64> {
        array![self.equilibrium_radius(), 0.0]
    }

    fn derivative(&self, state: ArrayView1<'_, f64>, pressure: f64) -> Array1<f64> {
        let (radius, velocity) = (state[0], state[1]);
        let acceleration = match *self {
            Self::Linear { r0, kappa, damping } => {
                let omega2 = 3.0 * kappa / (r0 * r0);
                -omega2 * (radius - r0) - damping * velocity - pressure / r0
            }
            Self::RayleighPlesset { r0, kappa } => {
                let gas = (r0 / radius).powf(3.0 * kappa);
                (gas - 1.0 - pressure - 1.5 * velocity * velocity) / radius
            }
        };
        array![velocity, acceleration]
    }
}

/// Period of small oscillations of a bubble of equilibrium radius `r0`.
pub fn natural_period(r0: f64) -> f64 {
    2.0 * std::f64::consts::PI / (3.0 * DEFAULT_POLYTROPIC_INDEX / (r0 * r0)).sqrt()
}
