use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::distribution::Shape;
use crate::integrator::Scheme;
use crate::model::{BubbleDynamics, DEFAULT_POLYTROPIC_INDEX};
use crate::moments::MomentSpec;
use crate::quadrature::QuadratureRule;
use crate::waveform::Waveform;
use crate::PopulationError;

/// Default iteration cap for one run
pub const DEFAULT_MAX_STEPS: usize = 10_000_000;

/// Distribution options. Key names follow the population input files.
///
/// Absent and `null` keys both take the values of
/// [`PopulationConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PopulationInput")]
pub struct PopulationConfig {
    #[serde(rename = "NR0")]
    pub node_count: usize,
    pub shape: Shape,
    pub binning: QuadratureRule,
    #[serde(rename = "sigR0")]
    pub sigma: f64,
    #[serde(rename = "muR0")]
    pub mu: f64,
    pub moments: Vec<Vec<i32>>,
    #[serde(rename = "Nfilt", skip_serializing_if = "Option::is_none")]
    pub n_filt: Option<usize>,
    #[serde(rename = "Tfilt", skip_serializing_if = "Option::is_none")]
    pub t_filt: Option<f64>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            node_count: 1,
            shape: Shape::Lognormal,
            binning: QuadratureRule::Simpson,
            sigma: 0.3,
            mu: 1.0,
            moments: vec![vec![0, 0]],
            n_filt: None,
            t_filt: None,
        }
    }
}

/// Population keys as read, before defaults are filled in
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PopulationInput {
    #[serde(rename = "NR0")]
    node_count: Option<usize>,
    shape: Option<Shape>,
    binning: Option<QuadratureRule>,
    #[serde(rename = "sigR0")]
    sigma: Option<f64>,
    #[serde(rename = "muR0")]
    mu: Option<f64>,
    moments: Option<Vec<Vec<i32>>>,
    #[serde(rename = "Nfilt")]
    n_filt: Option<usize>,
    #[serde(rename = "Tfilt")]
    t_filt: Option<f64>,
}

impl From<PopulationInput> for PopulationConfig {
    fn from(input: PopulationInput) -> Self {
        let defaults = Self::default();
        Self {
            node_count: input.node_count.unwrap_or(defaults.node_count),
            shape: input.shape.unwrap_or(defaults.shape),
            binning: input.binning.unwrap_or(defaults.binning),
            sigma: input.sigma.unwrap_or(defaults.sigma),
            mu: input.mu.unwrap_or(defaults.mu),
            moments: input.moments.unwrap_or(defaults.moments),
            n_filt: input.n_filt,
            t_filt: input.t_filt,
        }
    }
}

/// Moment filtering requested by a population
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterWidth {
    None,
    /// Average over this many samples
    Samples(usize),
    /// Average over this many natural periods of each node
    Periods(f64),
}

impl PopulationConfig {
    pub fn validate(&self) -> Result<(), PopulationError> {
        if self.n_filt.is_some() && self.t_filt.is_some() {
            return Err(PopulationError::ConflictingFilterConfig);
        }

        if self.node_count == 0 {
            return Err(PopulationError::invalid("NR0", self.node_count));
        }

        if !self.mu.is_finite() || self.mu <= 0.0 {
            return Err(PopulationError::invalid("muR0", self.mu));
        }

        if self.node_count > 1 && (!self.sigma.is_finite() || self.sigma <= 0.0) {
            return Err(PopulationError::invalid("sigR0", self.sigma));
        }

        if self.n_filt == Some(0) {
            return Err(PopulationError::invalid("Nfilt", 0));
        }

        if let Some(t_filt) = self.t_filt {
            if !t_filt.is_finite() || t_filt <= 0.0 {
                return Err(PopulationError::invalid("Tfilt", t_filt));
            }
        }

        self.moment_specs()?;
        Ok(())
    }

    pub fn moment_specs(&self) -> Result<Vec<MomentSpec>, PopulationError> {
        self.moments
            .iter()
            .map(|exponents| MomentSpec::from_exponents(exponents))
            .collect()
    }

    pub fn filter_width(&self) -> FilterWidth {
        match (self.n_filt, self.t_filt) {
            (Some(samples), _) => FilterWidth::Samples(samples),
            (None, Some(periods)) => FilterWidth::Periods(periods),
            (None, None) => FilterWidth::None,
        }
    }
}

/// Time-stepping options as written in input files
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    #[serde(rename = "T", skip_serializing_if = "Option::is_none")]
    pub t_final: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
    #[serde_as(as = "DefaultOnNull")]
    pub method: Scheme,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_tol: Option<f64>,
    #[serde(rename = "Nfilt", skip_serializing_if = "Option::is_none")]
    pub n_filt: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
}

/// Validated integrator options
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntegratorSettings {
    pub t_final: f64,
    pub dt: f64,
    pub scheme: Scheme,
    /// Zero for fixed-step schemes without a tolerance
    pub error_tol: f64,
    pub n_filt: Option<usize>,
    pub max_steps: usize,
}

impl IntegratorConfig {
    pub fn validate(&self) -> Result<(), PopulationError> {
        self.resolve().map(|_| ())
    }

    pub fn resolve(&self) -> Result<IntegratorSettings, PopulationError> {
        let t_final = self
            .t_final
            .ok_or(PopulationError::MissingRequiredConfig("T"))?;
        if !t_final.is_finite() || t_final <= 0.0 {
            return Err(PopulationError::invalid("T", t_final));
        }

        let dt = self.dt.ok_or(PopulationError::MissingRequiredConfig("dt"))?;
        if !dt.is_finite() || dt <= 0.0 {
            return Err(PopulationError::invalid("dt", dt));
        }

        let error_tol = match self.error_tol {
            Some(tol) if tol > 0.0 => tol,
            Some(tol) => return Err(PopulationError::invalid("error_tol", tol)),
            None if self.method.is_adaptive() => {
                return Err(PopulationError::MissingRequiredConfig("error_tol"))
            }
            None => 0.0,
        };

        if self.n_filt == Some(0) {
            return Err(PopulationError::invalid("Nfilt", 0));
        }

        let max_steps = self.max_steps.unwrap_or(DEFAULT_MAX_STEPS);
        if max_steps == 0 {
            return Err(PopulationError::invalid("max_steps", max_steps));
        }

        Ok(IntegratorSettings {
            t_final,
            dt,
            scheme: self.method,
            error_tol,
            n_filt: self.n_filt,
            max_steps,
        })
    }
}

/// Which built-in single-bubble model every node runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelConfig {
    Linear {
        #[serde(default = "default_kappa")]
        kappa: f64,
        #[serde(default)]
        damping: f64,
    },
    RayleighPlesset {
        #[serde(default = "default_kappa")]
        kappa: f64,
    },
}

fn default_kappa() -> f64 {
    DEFAULT_POLYTROPIC_INDEX
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::RayleighPlesset {
            kappa: DEFAULT_POLYTROPIC_INDEX,
        }
    }
}

impl ModelConfig {
    pub fn make(&self, r0: f64) -> BubbleDynamics {
        match *self {
            Self::Linear { kappa, damping } => BubbleDynamics::Linear { r0, kappa, damping },
            Self::RayleighPlesset { kappa } => BubbleDynamics::RayleighPlesset { r0, kappa },
        }
    }
}

/// Everything one simulation run needs
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub population: PopulationConfig,
    pub integrator: IntegratorConfig,
    #[serde_as(as = "DefaultOnNull")]
    pub waveform: Waveform,
    #[serde_as(as = "DefaultOnNull")]
    pub model: ModelConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            population: PopulationConfig {
                node_count: 21,
                binning: QuadratureRule::GaussHermite,
                moments: vec![vec![0, 0], vec![1, 0], vec![2, 0], vec![0, 2]],
                ..PopulationConfig::default()
            },
            integrator: IntegratorConfig {
                t_final: Some(30.0),
                dt: Some(0.01),
                method: Scheme::Rk23,
                error_tol: Some(1.0e-5),
                ..IntegratorConfig::default()
            },
            waveform: Waveform::default(),
            model: ModelConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, PopulationError> {
        let raw = fs::read_to_string(path)?;
        let config: SimulationConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PopulationError> {
        self.population.validate()?;
        self.integrator.validate()?;
        Ok(())
    }
}
