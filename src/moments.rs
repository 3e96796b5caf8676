//! Population moments by weighted quadrature sums
//!
//! A moment `(p, q)` of a population with two-component node states `x_i` is
//! `Σ w_i x_i0^p x_i1^q`; `(p, q, r)` additionally multiplies by `R0_i^r`.
//! Filtered modes first average the `(p, q)` product per node over samples
//! (ensemble filtering) or over a backward time window (time filtering).
//!
//! Summation order across nodes is unspecified.

use ndarray::{Array1, ArrayView1, ArrayView2, ArrayView3, Axis};

use crate::PopulationError;

/// State dimension the moment formulas are written for
pub const MOMENT_STATE_DIM: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentSpec {
    /// `x0^p · x1^q`
    Pq(i32, i32),
    /// `x0^p · x1^q · R0^r`
    Pqr(i32, i32, i32),
}

impl MomentSpec {
    pub fn from_exponents(exponents: &[i32]) -> Result<Self, PopulationError> {
        match *exponents {
            [p, q] => Ok(Self::Pq(p, q)),
            [p, q, r] => Ok(Self::Pqr(p, q, r)),
            _ => Err(PopulationError::UnsupportedMomentShape {
                arity: exponents.len(),
                state_dim: MOMENT_STATE_DIM,
            }),
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Self::Pq(..) => 2,
            Self::Pqr(..) => 3,
        }
    }

    pub fn state_exponents(self) -> (i32, i32) {
        match self {
            Self::Pq(p, q) | Self::Pqr(p, q, _) => (p, q),
        }
    }
}

/// State values a moment is computed from
#[derive(Debug, Clone, Copy)]
pub enum MomentValues<'a> {
    /// `(node, component)`
    Snapshot(ArrayView2<'a, f64>),
    /// `(sample or time, node, component)`
    Series(ArrayView3<'a, f64>),
}

impl MomentValues<'_> {
    pub fn rank(&self) -> usize {
        match self {
            Self::Snapshot(_) => 2,
            Self::Series(_) => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterParams<'a> {
    /// Number of leading samples to average over
    pub n_filt: Option<usize>,
    /// Per-node backward offsets for time filtering
    pub shifts: Option<&'a [usize]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MomentMode<'a> {
    Plain,
    Filtered(FilterParams<'a>),
}

/// Per-node averaging of a `(p, q)` product over a backward time window.
pub trait TimeFilter {
    /// `values` is `(time, node, component)` with `sample_count` entries along
    /// time. Returns one averaged product per node.
    fn accumulate(
        &self,
        values: ArrayView3<'_, f64>,
        moment: (i32, i32),
        sample_count: usize,
        shifts: &[usize],
        node_count: usize,
    ) -> Array1<f64>;
}

/// Node `i` averages the last `shifts[i] + 1` samples, clamped to the
/// available history. Nodes without a shift use the last sample alone and an
/// empty history yields zeros.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackwardWindowAverage;

impl TimeFilter for BackwardWindowAverage {
    fn accumulate(
        &self,
        values: ArrayView3<'_, f64>,
        moment: (i32, i32),
        sample_count: usize,
        shifts: &[usize],
        node_count: usize,
    ) -> Array1<f64> {
        let (p, q) = moment;
        let Some(last) = sample_count.checked_sub(1) else {
            return Array1::zeros(node_count);
        };
        Array1::from_iter((0..node_count).map(|node| {
            let shift = shifts.get(node).map_or(0, |&s| s.min(last));
            let total: f64 = (last - shift..=last)
                .map(|t| product(values[[t, node, 0]], values[[t, node, 1]], p, q))
                .sum();
            total / (shift + 1) as f64
        }))
    }
}

/// Moments of `values` with the built-in time filter.
pub fn estimate(
    values: MomentValues<'_>,
    weights: ArrayView1<'_, f64>,
    radii: ArrayView1<'_, f64>,
    specs: &[MomentSpec],
    mode: MomentMode<'_>,
) -> Result<Array1<f64>, PopulationError> {
    estimate_with(values, weights, radii, specs, mode, &BackwardWindowAverage)
}

/// Moments of `values`, delegating time-filter windows to `time_filter`.
pub fn estimate_with(
    values: MomentValues<'_>,
    weights: ArrayView1<'_, f64>,
    radii: ArrayView1<'_, f64>,
    specs: &[MomentSpec],
    mode: MomentMode<'_>,
    time_filter: &dyn TimeFilter,
) -> Result<Array1<f64>, PopulationError> {
    match (mode, values) {
        (MomentMode::Plain, MomentValues::Snapshot(snapshot)) => {
            plain(snapshot, weights, radii, specs)
        }
        (MomentMode::Filtered(params), MomentValues::Series(series)) => {
            match (params.n_filt, params.shifts) {
                (Some(n_filt), _) if n_filt > 0 => ensemble_filtered(series, weights, specs, n_filt),
                (_, Some(shifts)) => time_filtered(series, weights, specs, shifts, time_filter),
                _ => Err(PopulationError::MissingFilterParameter),
            }
        }
        (MomentMode::Plain, other) => Err(PopulationError::ValueRankMismatch {
            expected: 2,
            got: other.rank(),
        }),
        (MomentMode::Filtered(_), other) => Err(PopulationError::ValueRankMismatch {
            expected: 3,
            got: other.rank(),
        }),
    }
}

fn plain(
    values: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    radii: ArrayView1<'_, f64>,
    specs: &[MomentSpec],
) -> Result<Array1<f64>, PopulationError> {
    let (node_count, state_dim) = values.dim();
    check_nodes("weights", weights.len(), node_count)?;
    check_nodes("radii", radii.len(), node_count)?;

    let mut out = Array1::zeros(specs.len());
    for (k, spec) in specs.iter().enumerate() {
        check_state_dim(spec.arity(), state_dim)?;
        let (p, q) = spec.state_exponents();
        let radius_power = match *spec {
            MomentSpec::Pq(..) => None,
            MomentSpec::Pqr(_, _, r) => Some(r),
        };

        out[k] = (0..node_count)
            .map(|i| {
                let mut term = weights[i] * product(values[[i, 0]], values[[i, 1]], p, q);
                if let Some(r) = radius_power {
                    term *= radii[i].powi(r);
                }
                term
            })
            .sum();
    }
    Ok(out)
}

fn ensemble_filtered(
    values: ArrayView3<'_, f64>,
    weights: ArrayView1<'_, f64>,
    specs: &[MomentSpec],
    n_filt: usize,
) -> Result<Array1<f64>, PopulationError> {
    let (samples, node_count, state_dim) = values.dim();
    check_nodes("weights", weights.len(), node_count)?;
    if samples < n_filt {
        return Err(PopulationError::InsufficientSamples {
            required: n_filt,
            available: samples,
        });
    }

    let window = values.slice_axis(Axis(0), (0..n_filt).into());
    let mut out = Array1::zeros(specs.len());
    for (k, spec) in specs.iter().enumerate() {
        let (p, q) = pq_only(*spec, state_dim)?;
        let mut averaged = Array1::<f64>::zeros(node_count);
        for sample in window.axis_iter(Axis(0)) {
            for i in 0..node_count {
                averaged[i] += product(sample[[i, 0]], sample[[i, 1]], p, q);
            }
        }
        averaged /= n_filt as f64;
        out[k] = weights.dot(&averaged);
    }
    Ok(out)
}

fn time_filtered(
    values: ArrayView3<'_, f64>,
    weights: ArrayView1<'_, f64>,
    specs: &[MomentSpec],
    shifts: &[usize],
    time_filter: &dyn TimeFilter,
) -> Result<Array1<f64>, PopulationError> {
    let (samples, node_count, state_dim) = values.dim();
    check_nodes("weights", weights.len(), node_count)?;
    check_nodes("shifts", shifts.len(), node_count)?;
    if samples == 0 {
        return Err(PopulationError::InsufficientSamples {
            required: 1,
            available: 0,
        });
    }

    let mut out = Array1::zeros(specs.len());
    for (k, spec) in specs.iter().enumerate() {
        let moment = pq_only(*spec, state_dim)?;
        let averaged = time_filter.accumulate(values, moment, samples, shifts, node_count);
        if averaged.len() != node_count {
            return Err(PopulationError::LengthMismatch {
                context: "time filter output",
                expected: node_count,
                got: averaged.len(),
            });
        }
        out[k] = weights.dot(&averaged);
    }
    Ok(out)
}

/// Backward offsets covering `t_filt` natural periods of each node, counted
/// back from the last recorded time.
pub fn time_filter_shifts(times: &[f64], periods: ArrayView1<'_, f64>, t_filt: f64) -> Vec<usize> {
    let Some(&t_last) = times.last() else {
        return vec![0; periods.len()];
    };

    periods
        .iter()
        .map(|period| {
            let window = t_filt * period;
            let inside = times.iter().rev().take_while(|&&t| t_last - t <= window).count();
            inside.saturating_sub(1)
        })
        .collect()
}

fn product(x0: f64, x1: f64, p: i32, q: i32) -> f64 {
    x0.powi(p) * x1.powi(q)
}

fn pq_only(spec: MomentSpec, state_dim: usize) -> Result<(i32, i32), PopulationError> {
    match spec {
        MomentSpec::Pq(p, q) if state_dim == MOMENT_STATE_DIM => Ok((p, q)),
        _ => Err(PopulationError::UnsupportedMomentShape {
            arity: spec.arity(),
            state_dim,
        }),
    }
}

fn check_state_dim(arity: usize, state_dim: usize) -> Result<(), PopulationError> {
    if state_dim != MOMENT_STATE_DIM {
        return Err(PopulationError::UnsupportedMomentShape { arity, state_dim });
    }
    Ok(())
}

fn check_nodes(key: &'static str, len: usize, node_count: usize) -> Result<(), PopulationError> {
    if len != node_count {
        return Err(PopulationError::invalid(
            key,
            format!("{len} entries for {node_count} nodes"),
        ));
    }
    Ok(())
}
