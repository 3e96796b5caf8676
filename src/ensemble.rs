//! Per-node models over one shared state table
//!
//! `EnsembleState` owns a single `(node, component)` table. Each node slot
//! keeps the index of its row next to the model instance, so the table is
//! the only writable copy of any node's state. Models receive a read-only
//! view of their row whenever a derivative is requested.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3};

use crate::config::{FilterWidth, PopulationConfig};
use crate::model::{natural_period, BubbleModel};
use crate::moments::{self, FilterParams, MomentMode, MomentSpec, MomentValues};
use crate::quadrature::{self, QuadratureNodes};
use crate::PopulationError;

#[derive(Debug, Clone)]
struct NodeSlot<M> {
    row: usize,
    radius: f64,
    model: M,
}

#[derive(Debug, Clone)]
pub struct EnsembleState<M> {
    slots: Vec<NodeSlot<M>>,
    values: Array2<f64>,
    state_dim: usize,
    nodes: QuadratureNodes,
    moment_specs: Vec<MomentSpec>,
    filter: FilterWidth,
}

impl<M: BubbleModel> EnsembleState<M> {
    /// One model per node from `factory(radius)`, in node order.
    pub fn new<F>(nodes: QuadratureNodes, mut factory: F) -> Result<Self, PopulationError>
    where
        F: FnMut(f64) -> M,
    {
        let mut slots = Vec::with_capacity(nodes.len());
        let mut initial_rows = Vec::with_capacity(nodes.len());
        let mut state_dim = None;

        for (row, &radius) in nodes.abscissas.iter().enumerate() {
            let model = factory(radius);
            let declared = model.state_dim();
            let expected = *state_dim.get_or_insert(declared);
            if declared != expected {
                return Err(PopulationError::StateDimensionMismatch {
                    node: row,
                    expected,
                    got: declared,
                });
            }

            let initial = model.initial_state();
            if initial.len() != declared {
                return Err(PopulationError::StateDimensionMismatch {
                    node: row,
                    expected: declared,
                    got: initial.len(),
                });
            }

            initial_rows.push(initial);
            slots.push(NodeSlot { row, radius, model });
        }

        let state_dim = state_dim.unwrap_or(0);
        let mut values = Array2::zeros((slots.len(), state_dim));
        for (slot, initial) in slots.iter().zip(&initial_rows) {
            values.row_mut(slot.row).assign(initial);
        }

        Ok(Self {
            slots,
            values,
            state_dim,
            nodes,
            moment_specs: vec![MomentSpec::Pq(0, 0)],
            filter: FilterWidth::None,
        })
    }

    /// Validates `config`, builds its quadrature and then the node models.
    pub fn from_config<F>(config: &PopulationConfig, factory: F) -> Result<Self, PopulationError>
    where
        F: FnMut(f64) -> M,
    {
        config.validate()?;
        let nodes = quadrature::build(
            config.shape,
            config.binning,
            config.node_count,
            config.mu,
            config.sigma,
        )?;

        let mut ensemble = Self::new(nodes, factory)?;
        ensemble.moment_specs = config.moment_specs()?;
        ensemble.filter = config.filter_width();
        Ok(ensemble)
    }

    /// Derivative table for `state` with every node seeing `pressure`.
    pub fn derivative(
        &self,
        state: ArrayView2<'_, f64>,
        pressure: f64,
    ) -> Result<Array2<f64>, PopulationError> {
        if state.dim() != self.values.dim() {
            return Err(PopulationError::TableShapeMismatch {
                expected: self.values.dim(),
                got: state.dim(),
            });
        }

        let mut out = Array2::zeros(state.raw_dim());
        for slot in &self.slots {
            let rate = slot.model.derivative(state.row(slot.row), pressure);
            if rate.len() != self.state_dim {
                return Err(PopulationError::StateDimensionMismatch {
                    node: slot.row,
                    expected: self.state_dim,
                    got: rate.len(),
                });
            }
            out.row_mut(slot.row).assign(&rate);
        }
        Ok(out)
    }

    pub fn model(&self, node: usize) -> Option<&M> {
        self.slots.get(node).map(|slot| &slot.model)
    }
}

impl<M> EnsembleState<M> {
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn set_values(&mut self, values: Array2<f64>) -> Result<(), PopulationError> {
        if values.dim() != self.values.dim() {
            return Err(PopulationError::TableShapeMismatch {
                expected: self.values.dim(),
                got: values.dim(),
            });
        }
        self.values = values;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn nodes(&self) -> &QuadratureNodes {
        &self.nodes
    }

    pub fn radii(&self) -> ArrayView1<'_, f64> {
        self.nodes.abscissas.view()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.nodes.weights.view()
    }

    pub fn radius(&self, node: usize) -> Option<f64> {
        self.slots.get(node).map(|slot| slot.radius)
    }

    pub fn moment_specs(&self) -> &[MomentSpec] {
        &self.moment_specs
    }

    pub fn set_moment_specs(&mut self, specs: Vec<MomentSpec>) {
        self.moment_specs = specs;
    }

    pub fn filter_width(&self) -> FilterWidth {
        self.filter
    }

    /// Small-amplitude oscillation period of every node.
    pub fn natural_periods(&self) -> Array1<f64> {
        self.slots.iter().map(|slot| natural_period(slot.radius)).collect()
    }

    /// Plain moments of the current table.
    pub fn moments(&self) -> Result<Array1<f64>, PopulationError> {
        self.moments_of(self.values.view())
    }

    pub fn moments_of(&self, snapshot: ArrayView2<'_, f64>) -> Result<Array1<f64>, PopulationError> {
        moments::estimate(
            MomentValues::Snapshot(snapshot),
            self.weights(),
            self.radii(),
            &self.moment_specs,
            MomentMode::Plain,
        )
    }

    /// Moments of a `(sample, node, component)` series filtered the way the
    /// population was configured. `times` must match the leading axis.
    ///
    /// A sample width averages the leading `Nfilt` samples, so run history
    /// must be cut to its trailing window first
    /// (see [`crate::TimeAdvancer::filtered_moments`]).
    pub fn filtered_moments(
        &self,
        series: ArrayView3<'_, f64>,
        times: &[f64],
    ) -> Result<Array1<f64>, PopulationError> {
        let shifts;
        let params = match self.filter {
            FilterWidth::Samples(n_filt) => FilterParams {
                n_filt: Some(n_filt),
                shifts: None,
            },
            FilterWidth::Periods(t_filt) => {
                shifts = moments::time_filter_shifts(times, self.natural_periods().view(), t_filt);
                FilterParams {
                    n_filt: None,
                    shifts: Some(&shifts),
                }
            }
            FilterWidth::None => FilterParams::default(),
        };

        moments::estimate(
            MomentValues::Series(series),
            self.weights(),
            self.radii(),
            &self.moment_specs,
            MomentMode::Filtered(params),
        )
    }
}
