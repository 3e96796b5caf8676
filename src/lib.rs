//! bubblepop - quadrature-based population balance for bubble clouds
//!
//! A continuous distribution of initial bubble radii is discretized into
//! weighted quadrature nodes. Every node carries its own oscillator state,
//! all nodes are advanced together against one shared pressure forcing, and
//! statistical moments of the population are rebuilt as weighted sums.

pub mod config;
pub mod distribution;
pub mod ensemble;
pub mod integrator;
pub mod model;
pub mod moments;
pub mod output;
pub mod quadrature;
pub mod waveform;

use thiserror::Error;

pub use config::{IntegratorConfig, ModelConfig, PopulationConfig, SimulationConfig};
pub use distribution::Shape;
pub use ensemble::EnsembleState;
pub use integrator::{RunHistory, RunSummary, Scheme, StepController, TimeAdvancer};
pub use model::{BubbleDynamics, BubbleModel, ZeroModel};
pub use moments::{
    estimate, BackwardWindowAverage, FilterParams, MomentMode, MomentSpec, MomentValues,
    TimeFilter,
};
pub use quadrature::{QuadratureNodes, QuadratureRule};
pub use waveform::{Forcing, Waveform};

#[derive(Debug, Error)]
pub enum PopulationError {
    #[error("invalid quadrature support: lower bound {lower} must be positive")]
    InvalidSupport { lower: f64 },
    #[error("density vanishes over the quadrature support (max |pdf| = {max_density:e})")]
    DegeneratePdf { max_density: f64 },
    #[error("quadrature rule {rule} does not support the {shape} shape")]
    UnsupportedShape {
        shape: &'static str,
        rule: &'static str,
    },
    #[error("unsupported quadrature rule: {0}")]
    UnsupportedRule(String),
    #[error("Hermite root {root_index} did not converge after {iterations} Newton iterations")]
    RootFindingDivergence { root_index: usize, iterations: usize },
    #[error("choose one of Nfilt and Tfilt")]
    ConflictingFilterConfig,
    #[error("filtered moments need one of Nfilt or time-filter shifts")]
    MissingFilterParameter,
    #[error("cannot handle moment of arity {arity} with state dimension {state_dim}")]
    UnsupportedMomentShape { arity: usize, state_dim: usize },
    #[error("missing required configuration key: {0}")]
    MissingRequiredConfig(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidConfigValue { key: &'static str, value: String },
    #[error("node {node} state length mismatch: expected {expected}, got {got}")]
    StateDimensionMismatch {
        node: usize,
        expected: usize,
        got: usize,
    },
    #[error("state table shape mismatch: expected {expected:?}, got {got:?}")]
    TableShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("filter needs {required} samples, only {available} available")]
    InsufficientSamples { required: usize, available: usize },
    #[error("moment values have rank {got}, expected rank {expected}")]
    ValueRankMismatch { expected: usize, got: usize },
    #[error("run stopped after {steps} steps at t = {time} without reaching the final time")]
    StepLimitExceeded { steps: usize, time: f64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PopulationError {
    pub(crate) fn invalid(key: &'static str, value: impl ToString) -> Self {
        Self::InvalidConfigValue {
            key,
            value: value.to_string(),
        }
    }
}
