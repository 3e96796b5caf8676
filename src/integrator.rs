//! Time integration of the whole ensemble
//!
//! Every scheme advances the full state table in one call, evaluating the
//! ensemble derivative against the shared forcing. Embedded schemes also
//! return a relative error estimate that drives the step controller.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{FilterWidth, IntegratorConfig, IntegratorSettings};
use crate::ensemble::EnsembleState;
use crate::model::BubbleModel;
use crate::moments::{self, FilterParams, MomentMode, MomentValues};
use crate::waveform::Forcing;
use crate::PopulationError;

/// Largest step the adaptive controller will take
pub const DT_MAX: f64 = 1.0e5;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.3;
const MAX_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scheme {
    #[default]
    #[serde(rename = "Euler", alias = "euler")]
    Euler,
    /// Heun
    #[serde(rename = "RK2", alias = "rk2")]
    Rk2,
    /// Three-stage strong-stability-preserving Runge-Kutta
    #[serde(rename = "RK3", alias = "rk3")]
    Rk3,
    /// Euler embedded in Heun
    #[serde(rename = "RK12", alias = "rk12")]
    Rk12,
    /// SSP-RK2 embedded in SSP-RK3
    #[serde(rename = "RK23", alias = "rk23")]
    Rk23,
}

impl Scheme {
    pub fn name(self) -> &'static str {
        match self {
            Self::Euler => "Euler",
            Self::Rk2 => "RK2",
            Self::Rk3 => "RK3",
            Self::Rk12 => "RK12",
            Self::Rk23 => "RK23",
        }
    }

    pub fn is_adaptive(self) -> bool {
        matches!(self, Self::Rk12 | Self::Rk23)
    }

    /// Derivative evaluations per step.
    pub fn evaluations(self) -> usize {
        match self {
            Self::Euler => 1,
            Self::Rk2 | Self::Rk12 => 2,
            Self::Rk3 | Self::Rk23 => 3,
        }
    }

    /// Advance `x0` from `time` by `dt`. The error is `Some` only for
    /// embedded schemes.
    pub fn step<'a, M, W>(
        self,
        ensemble: &'a EnsembleState<M>,
        forcing: &'a W,
        x0: ArrayView2<'a, f64>,
        time: f64,
        dt: f64,
    ) -> Result<StepOutcome, PopulationError>
    where
        M: BubbleModel,
        W: Forcing + ?Sized,
    {
        let stages = Stages {
            ensemble,
            forcing,
            x0,
            time,
            dt,
        };

        let outcome = match self {
            Self::Euler => StepOutcome {
                state: stages.euler()?,
                error: None,
            },
            Self::Rk2 => StepOutcome {
                state: stages.heun()?.1,
                error: None,
            },
            Self::Rk3 => StepOutcome {
                state: stages.ssp3()?.1,
                error: None,
            },
            Self::Rk12 => {
                let (coarse, fine) = stages.heun()?;
                let error = relative_error(fine.view(), coarse.view());
                StepOutcome {
                    state: fine,
                    error: Some(error),
                }
            }
            Self::Rk23 => {
                let (coarse, fine) = stages.ssp3()?;
                let error = relative_error(fine.view(), coarse.view());
                StepOutcome {
                    state: fine,
                    error: Some(error),
                }
            }
        };
        Ok(outcome)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scheme {
    type Err = PopulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EULER" => Ok(Self::Euler),
            "RK2" => Ok(Self::Rk2),
            "RK3" => Ok(Self::Rk3),
            "RK12" => Ok(Self::Rk12),
            "RK23" => Ok(Self::Rk23),
            _ => Err(PopulationError::invalid("method", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub state: Array2<f64>,
    pub error: Option<f64>,
}

/// Stage evaluations shared by the schemes.
struct Stages<'a, M, W: ?Sized> {
    ensemble: &'a EnsembleState<M>,
    forcing: &'a W,
    x0: ArrayView2<'a, f64>,
    time: f64,
    dt: f64,
}

impl<M: BubbleModel, W: Forcing + ?Sized> Stages<'_, M, W> {
    fn rate(&self, state: ArrayView2<'_, f64>, time: f64) -> Result<Array2<f64>, PopulationError> {
        self.ensemble.derivative(state, self.forcing.pressure(time))
    }

    fn euler(&self) -> Result<Array2<f64>, PopulationError> {
        let rate = self.rate(self.x0, self.time)?;
        Ok(&self.x0 + &(rate * self.dt))
    }

    /// `(euler, heun)`
    fn heun(&self) -> Result<(Array2<f64>, Array2<f64>), PopulationError> {
        let trial = self.euler()?;
        let heun = self.blend_end(&trial)?;
        Ok((trial, heun))
    }

    /// `(ssp2, ssp3)`; the second-order result is the Heun blend of the
    /// shared trial stage.
    fn ssp3(&self) -> Result<(Array2<f64>, Array2<f64>), PopulationError> {
        let trial = self.euler()?;
        let end_rate = self.rate(trial.view(), self.time + self.dt)?;
        let advanced = &trial + &(end_rate * self.dt);

        let ssp2 = &self.x0 * 0.5 + &advanced * 0.5;
        let middle = &self.x0 * 0.75 + &advanced * 0.25;

        let mid_rate = self.rate(middle.view(), self.time + 0.5 * self.dt)?;
        let ssp3 = &self.x0 * (1.0 / 3.0) + (&middle + &(mid_rate * self.dt)) * (2.0 / 3.0);
        Ok((ssp2, ssp3))
    }

    fn blend_end(&self, trial: &Array2<f64>) -> Result<Array2<f64>, PopulationError> {
        let end_rate = self.rate(trial.view(), self.time + self.dt)?;
        Ok(&self.x0 * 0.5 + (trial + &(end_rate * self.dt)) * 0.5)
    }
}

/// `‖fine − coarse‖ / ‖fine‖` over the flattened tables.
pub fn relative_error(fine: ArrayView2<'_, f64>, coarse: ArrayView2<'_, f64>) -> f64 {
    let diff = fine
        .iter()
        .zip(coarse.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    if diff == 0.0 {
        return 0.0;
    }

    let norm = fine.iter().map(|a| a * a).sum::<f64>().sqrt();
    if norm == 0.0 {
        f64::INFINITY
    } else {
        diff / norm
    }
}

/// Step-size control for embedded schemes.
///
/// The step never drops below the nominal step it was created with and
/// never exceeds [`DT_MAX`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepController {
    pub tolerance: f64,
    pub dt_min: f64,
    pub dt_max: f64,
}

impl StepController {
    pub fn new(tolerance: f64, nominal_dt: f64) -> Self {
        Self {
            tolerance,
            dt_min: nominal_dt,
            dt_max: DT_MAX,
        }
    }

    /// Next step after a step of size `dt` produced `error`.
    pub fn adapt(&self, dt: f64, error: f64) -> f64 {
        // NaN falls through max() to the floor
        let fraction = (0.5 * self.tolerance / error).sqrt();
        let factor = fraction.max(MIN_FACTOR).min(MAX_FACTOR);
        (SAFETY * factor * dt).max(self.dt_min).min(self.dt_max)
    }

    pub fn is_pinned(&self, dt: f64) -> bool {
        dt <= self.dt_min || dt >= self.dt_max
    }
}

/// Simulation time accumulated with compensated summation, so that `k`
/// steps of `dt` land on `k·dt` to within one rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimClock {
    time: f64,
    carry: f64,
}

impl SimClock {
    pub fn now(&self) -> f64 {
        self.time
    }

    pub fn advance(&mut self, dt: f64) {
        let y = dt - self.carry;
        let t = self.time + y;
        self.carry = (t - self.time) - y;
        self.time = t;
    }
}

/// Times and state tables, one entry recorded before each step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunHistory {
    times: Vec<f64>,
    snapshots: Vec<Array2<f64>>,
}

impl RunHistory {
    pub fn push(&mut self, time: f64, snapshot: Array2<f64>) {
        self.times.push(time);
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn snapshots(&self) -> &[Array2<f64>] {
        &self.snapshots
    }

    pub fn last(&self) -> Option<(f64, &Array2<f64>)> {
        Some((*self.times.last()?, self.snapshots.last()?))
    }

    /// All snapshots as one `(time, node, component)` array.
    pub fn stacked(&self) -> Array3<f64> {
        let (rows, cols) = self.snapshots.first().map_or((0, 0), |s| s.dim());
        let mut out = Array3::zeros((self.snapshots.len(), rows, cols));
        for (mut slab, snapshot) in out.axis_iter_mut(Axis(0)).zip(&self.snapshots) {
            slab.assign(snapshot);
        }
        out
    }

    /// The last `n` entries, or all of them if fewer were recorded.
    pub fn trailing(&self, n: usize) -> RunHistory {
        let start = self.len().saturating_sub(n);
        RunHistory {
            times: self.times[start..].to_vec(),
            snapshots: self.snapshots[start..].to_vec(),
        }
    }

    fn clear(&mut self) {
        self.times.clear();
        self.snapshots.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub scheme: Scheme,
    pub steps: usize,
    pub final_time: f64,
    pub nominal_dt: f64,
    pub final_dt: f64,
    pub largest_dt: f64,
    pub max_error: Option<f64>,
    pub history_len: usize,
}

/// Drives one ensemble through time against a forcing.
#[derive(Debug)]
pub struct TimeAdvancer<M, W> {
    ensemble: EnsembleState<M>,
    forcing: W,
    settings: IntegratorSettings,
    controller: Option<StepController>,
    clock: SimClock,
    dt: f64,
    steps: usize,
    history: RunHistory,
    largest_dt: f64,
    max_error: Option<f64>,
}

impl<M: BubbleModel, W: Forcing> TimeAdvancer<M, W> {
    pub fn new(settings: IntegratorSettings, ensemble: EnsembleState<M>, forcing: W) -> Self {
        let controller = settings
            .scheme
            .is_adaptive()
            .then(|| StepController::new(settings.error_tol, settings.dt));
        Self {
            ensemble,
            forcing,
            settings,
            controller,
            clock: SimClock::default(),
            dt: settings.dt,
            steps: 0,
            history: RunHistory::default(),
            largest_dt: settings.dt,
            max_error: None,
        }
    }

    pub fn from_config(
        config: &IntegratorConfig,
        ensemble: EnsembleState<M>,
        forcing: W,
    ) -> Result<Self, PopulationError> {
        Ok(Self::new(config.resolve()?, ensemble, forcing))
    }

    /// Advance the table by one step of the current size without moving
    /// the clock. Returns the embedded error estimate, if any.
    pub fn advance(&mut self) -> Result<Option<f64>, PopulationError> {
        let outcome = self.settings.scheme.step(
            &self.ensemble,
            &self.forcing,
            self.ensemble.values(),
            self.clock.now(),
            self.dt,
        )?;
        self.ensemble.set_values(outcome.state)?;
        Ok(outcome.error)
    }

    /// Integrate from time zero until the clock reaches the final time.
    ///
    /// Each call starts a fresh clock and history from the current table.
    /// On failure the history recorded so far stays available through
    /// [`TimeAdvancer::history`].
    pub fn run(&mut self) -> Result<RunSummary, PopulationError> {
        let t_final = self.settings.t_final;
        self.clock = SimClock::default();
        self.dt = self.settings.dt;
        self.steps = 0;
        self.history.clear();
        self.largest_dt = self.dt;
        self.max_error = None;
        let mut pinned = false;

        while self.clock.now() < t_final {
            if self.steps >= self.settings.max_steps {
                return Err(PopulationError::StepLimitExceeded {
                    steps: self.steps,
                    time: self.clock.now(),
                });
            }

            self.history
                .push(self.clock.now(), self.ensemble.values().to_owned());
            let error = self.advance()?;
            self.steps += 1;
            self.clock.advance(self.dt);

            if let (Some(controller), Some(error)) = (self.controller, error) {
                self.max_error = Some(self.max_error.map_or(error, |m| m.max(error)));
                self.dt = controller.adapt(self.dt, error);
                self.largest_dt = self.largest_dt.max(self.dt);

                let now_pinned = controller.is_pinned(self.dt);
                if now_pinned && !pinned {
                    warn!(
                        step = self.steps,
                        dt = self.dt,
                        error,
                        "adaptive step pinned to its bound"
                    );
                }
                pinned = now_pinned;
            }

            debug!(
                "step {}: dt/dt0 = {:.3}, {:.1}% done",
                self.steps,
                self.dt / self.settings.dt,
                100.0 * self.clock.now() / t_final
            );
        }

        let summary = self.summary();
        info!(
            scheme = %summary.scheme,
            steps = summary.steps,
            final_time = summary.final_time,
            "run complete"
        );
        Ok(summary)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            scheme: self.settings.scheme,
            steps: self.steps,
            final_time: self.clock.now(),
            nominal_dt: self.settings.dt,
            final_dt: self.dt,
            largest_dt: self.largest_dt,
            max_error: self.max_error,
            history_len: self.history.len(),
        }
    }
}

impl<M: BubbleModel, W> TimeAdvancer<M, W> {
    pub fn ensemble(&self) -> &EnsembleState<M> {
        &self.ensemble
    }

    pub fn into_ensemble(self) -> EnsembleState<M> {
        self.ensemble
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn time(&self) -> f64 {
        self.clock.now()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Plain moments of the current table.
    pub fn moments(&self) -> Result<Array1<f64>, PopulationError> {
        self.ensemble.moments()
    }

    /// Plain moments of every history entry, one row per entry.
    pub fn moment_series(&self) -> Result<Array2<f64>, PopulationError> {
        let specs = self.ensemble.moment_specs().len();
        let mut out = Array2::zeros((self.history.len(), specs));
        for (mut row, snapshot) in out.axis_iter_mut(Axis(0)).zip(self.history.snapshots()) {
            row.assign(&self.ensemble.moments_of(snapshot.view())?);
        }
        Ok(out)
    }

    /// Filtered moments over the history. A sample window (the integrator's
    /// `Nfilt`, else the population's) averages the last `Nfilt` entries; a
    /// population `Tfilt` averages each node over its own backward window.
    pub fn filtered_moments(&self) -> Result<Array1<f64>, PopulationError> {
        let n_filt = self.settings.n_filt.or(match self.ensemble.filter_width() {
            FilterWidth::Samples(n) => Some(n),
            FilterWidth::Periods(_) | FilterWidth::None => None,
        });

        match n_filt {
            Some(n_filt) => {
                let window = self.history.trailing(n_filt).stacked();
                moments::estimate(
                    MomentValues::Series(window.view()),
                    self.ensemble.weights(),
                    self.ensemble.radii(),
                    self.ensemble.moment_specs(),
                    MomentMode::Filtered(FilterParams {
                        n_filt: Some(n_filt),
                        shifts: None,
                    }),
                )
            }
            None => self
                .ensemble
                .filtered_moments(self.history.stacked().view(), self.history.times()),
        }
    }
}
