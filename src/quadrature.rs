//! Quadrature discretization of the initial-radius distribution
//!
//! Every rule produces `N` abscissas (initial radii) and `N` weights so that
//! `∫ g(r) f(r) dr ≈ Σ w_i g(r_i)`. Simpson and Gauss-Legendre weights are
//! normalized to sum to one numerically; Gauss-Hermite weights are divided
//! by the analytic `√π` of the Hermite weight function instead.

use std::f64::consts::PI;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::distribution::{support_bounds, Shape};
use crate::PopulationError;

/// Newton update size below which a polynomial root is accepted
pub const ROOT_TOLERANCE: f64 = 3.0e-14;
/// Newton iterations allowed per root
pub const MAX_NEWTON_ITERATIONS: usize = 100;
/// Smallest peak density accepted on a bounded support
pub const MIN_PEAK_DENSITY: f64 = 1.0e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuadratureRule {
    /// Composite Simpson coefficients on log-spaced nodes
    #[serde(rename = "Simpson", alias = "simpson")]
    Simpson,
    #[serde(rename = "GL", alias = "gauss-legendre")]
    GaussLegendre,
    /// Hermite rule in log-radius, lognormal only
    #[serde(rename = "GH", alias = "gauss-hermite")]
    GaussHermite,
}

impl Default for QuadratureRule {
    fn default() -> Self {
        Self::Simpson
    }
}

impl QuadratureRule {
    pub fn name(self) -> &'static str {
        match self {
            Self::Simpson => "Simpson",
            Self::GaussLegendre => "GL",
            Self::GaussHermite => "GH",
        }
    }
}

impl FromStr for QuadratureRule {
    type Err = PopulationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "Simpson" | "simpson" => Ok(Self::Simpson),
            "GL" | "gauss-legendre" => Ok(Self::GaussLegendre),
            "GH" | "gauss-hermite" => Ok(Self::GaussHermite),
            other => Err(PopulationError::UnsupportedRule(other.to_string())),
        }
    }
}

/// Node set of one discretized population. Node index is identity.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureNodes {
    pub abscissas: Array1<f64>,
    pub weights: Array1<f64>,
}

impl QuadratureNodes {
    pub fn len(&self) -> usize {
        self.abscissas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abscissas.is_empty()
    }

    pub fn weight_sum(&self) -> f64 {
        self.weights.sum()
    }
}

/// Discretize `shape` into `n` nodes with `rule`.
pub fn build(
    shape: Shape,
    rule: QuadratureRule,
    n: usize,
    loc: f64,
    scale: f64,
) -> Result<QuadratureNodes, PopulationError> {
    match n {
        0 => Err(PopulationError::invalid("NR0", n)),
        1 => Ok(QuadratureNodes {
            abscissas: Array1::from_elem(1, loc),
            weights: Array1::ones(1),
        }),
        _ => match rule {
            QuadratureRule::Simpson => simpson(shape, n, loc, scale),
            QuadratureRule::GaussLegendre => gauss_legendre(shape, n, loc, scale),
            QuadratureRule::GaussHermite => {
                if shape != Shape::Lognormal {
                    return Err(PopulationError::UnsupportedShape {
                        shape: shape.name(),
                        rule: rule.name(),
                    });
                }
                gauss_hermite(n, scale)
            }
        },
    }
}

fn simpson(shape: Shape, n: usize, loc: f64, scale: f64) -> Result<QuadratureNodes, PopulationError> {
    let (a, b) = support_bounds(loc, scale)?;
    let abscissas = Array1::logspace(10.0, a.log10(), b.log10(), n);
    let density = densities(shape, &abscissas, loc, scale);
    check_density(&density)?;

    let mut spacing = Array1::zeros(n);
    for i in 0..n - 1 {
        spacing[i] = abscissas[i + 1] - abscissas[i];
    }
    spacing[n - 1] = spacing[n - 2];

    let coefficients = Array1::from_iter((0..n).map(|i| {
        if i == 0 || i == n - 1 {
            1.0 / 3.0
        } else if i % 2 == 0 {
            2.0 / 3.0
        } else {
            4.0 / 3.0
        }
    }));

    let weights = normalized(coefficients * spacing * density);
    Ok(QuadratureNodes { abscissas, weights })
}

fn gauss_legendre(
    shape: Shape,
    n: usize,
    loc: f64,
    scale: f64,
) -> Result<QuadratureNodes, PopulationError> {
    let (a, b) = support_bounds(loc, scale)?;
    let (unit_nodes, unit_weights) = legendre_nodes(n)?;

    let abscissas = unit_nodes.mapv(|x| (x + 1.0) * 0.5 * (b - a) + a);
    let density = densities(shape, &abscissas, loc, scale);
    check_density(&density)?;
    let weights = normalized(unit_weights * density);
    Ok(QuadratureNodes { abscissas, weights })
}

fn gauss_hermite(n: usize, scale: f64) -> Result<QuadratureNodes, PopulationError> {
    let (roots, weights) = hermite_nodes(n)?;
    let weights = weights / PI.sqrt();

    // roots run from the largest down to the smallest
    let abscissas = roots
        .iter()
        .rev()
        .map(|z| (2.0_f64.sqrt() * scale * z).exp())
        .collect::<Array1<f64>>();

    Ok(QuadratureNodes { abscissas, weights })
}

fn densities(shape: Shape, abscissas: &Array1<f64>, loc: f64, scale: f64) -> Array1<f64> {
    abscissas.mapv(|x| shape.pdf(x, loc, scale))
}

fn normalized(raw: Array1<f64>) -> Array1<f64> {
    let total = raw.sum();
    raw / total
}

fn check_density(density: &Array1<f64>) -> Result<(), PopulationError> {
    let max_density = density.iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
    if max_density < MIN_PEAK_DENSITY {
        return Err(PopulationError::DegeneratePdf { max_density });
    }
    Ok(())
}

/// Gauss-Legendre nodes (ascending) and weights on `[-1, 1]`.
pub fn legendre_nodes(n: usize) -> Result<(Array1<f64>, Array1<f64>), PopulationError> {
    let mut nodes = Array1::zeros(n);
    let mut weights = Array1::zeros(n);

    for i in 0..(n + 1) / 2 {
        let mut z = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut slope = 0.0;
        let mut converged = false;

        for _ in 0..MAX_NEWTON_ITERATIONS {
            let (p1, p2) = legendre_pair(n, z);
            slope = n as f64 * (z * p1 - p2) / (z * z - 1.0);
            let previous = z;
            z = previous - p1 / slope;
            if (z - previous).abs() <= ROOT_TOLERANCE {
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(PopulationError::RootFindingDivergence {
                root_index: i,
                iterations: MAX_NEWTON_ITERATIONS,
            });
        }

        nodes[i] = -z;
        nodes[n - 1 - i] = z;
        weights[i] = 2.0 / ((1.0 - z * z) * slope * slope);
        weights[n - 1 - i] = weights[i];
    }

    Ok((nodes, weights))
}

/// `(P_n(z), P_{n-1}(z))` by the three-term recurrence.
fn legendre_pair(n: usize, z: f64) -> (f64, f64) {
    let mut p1 = 1.0;
    let mut p2 = 0.0;
    for j in 0..n {
        let p3 = p2;
        p2 = p1;
        p1 = ((2 * j + 1) as f64 * z * p2 - j as f64 * p3) / (j + 1) as f64;
    }
    (p1, p2)
}

/// Roots of the physicists' Hermite polynomial `H_n` and their weights for
/// the weight function `exp(-z²)` (weights sum to `√π`).
///
/// Only the non-negative half is solved for; entry `i` of the left half is
/// mirrored into `n - 1 - i` with its sign flipped, so the result starts at
/// the largest root and ends at its negation. For odd `n` the middle root is
/// zero and is its own mirror.
pub fn hermite_nodes(n: usize) -> Result<(Array1<f64>, Array1<f64>), PopulationError> {
    let mut roots = Array1::<f64>::zeros(n);
    let mut weights = Array1::<f64>::zeros(n);
    let nf = n as f64;
    let mut z = 0.0;

    for i in 0..(n + 1) / 2 {
        z = match i {
            0 => (2.0 * nf + 1.0).sqrt() - 1.85575 * (2.0 * nf + 1.0).powf(-0.16667),
            1 => z - 1.14 * nf.powf(0.426) / z,
            2 => 1.86 * z - 0.86 * roots[0],
            3 => 1.91 * z - 0.91 * roots[1],
            _ => 2.0 * z - roots[i - 2],
        };

        let mut slope = 0.0;
        let mut converged = false;
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let (p1, p2) = hermite_pair(n, z);
            slope = (2.0 * nf).sqrt() * p2;
            let previous = z;
            z = previous - p1 / slope;
            if (z - previous).abs() <= ROOT_TOLERANCE {
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(PopulationError::RootFindingDivergence {
                root_index: i,
                iterations: MAX_NEWTON_ITERATIONS,
            });
        }

        roots[i] = z;
        roots[n - 1 - i] = -z;
        weights[i] = 2.0 / (slope * slope);
        weights[n - 1 - i] = weights[i];
    }

    Ok((roots, weights))
}

/// Orthonormal Hermite functions `(φ_n(z), φ_{n-1}(z))`.
fn hermite_pair(n: usize, z: f64) -> (f64, f64) {
    let mut p1 = PI.powf(-0.25);
    let mut p2 = 0.0;
    for j in 0..n {
        let p3 = p2;
        p2 = p1;
        let jf = j as f64;
        p1 = z * (2.0 / (jf + 1.0)).sqrt() * p2 - (jf / (jf + 1.0)).sqrt() * p3;
    }
    (p1, p2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_radius(nodes: &QuadratureNodes) -> f64 {
        (&nodes.weights * &nodes.abscissas).sum()
    }

    #[test]
    fn single_node_ignores_shape_and_rule() {
        for (shape, rule) in [
            (Shape::Lognormal, QuadratureRule::Simpson),
            (Shape::Normal, QuadratureRule::GaussHermite),
            (Shape::Normal, QuadratureRule::GaussLegendre),
        ] {
            let nodes = build(shape, rule, 1, 2.5, 0.3).unwrap();
            assert_eq!(nodes.abscissas.to_vec(), vec![2.5]);
            assert_eq!(nodes.weights.to_vec(), vec![1.0]);
        }
    }

    #[test]
    fn zero_nodes_is_invalid() {
        let err = build(Shape::Lognormal, QuadratureRule::Simpson, 0, 1.0, 0.3).unwrap_err();
        assert!(matches!(err, PopulationError::InvalidConfigValue { key: "NR0", .. }));
    }

    #[test]
    fn simpson_weights_sum_to_one() {
        let nodes = build(Shape::Lognormal, QuadratureRule::Simpson, 31, 1.0, 0.3).unwrap();
        assert_eq!(nodes.len(), 31);
        assert!((nodes.weight_sum() - 1.0).abs() < 1e-12);
        assert!(nodes.weights.iter().all(|&w| w >= 0.0));
    }

    #[test]
    fn simpson_nodes_are_log_uniform_over_support() {
        let nodes = build(Shape::Lognormal, QuadratureRule::Simpson, 5, 1.0, 0.3).unwrap();
        let (a, b) = support_bounds(1.0, 0.3).unwrap();
        assert!((nodes.abscissas[0] - a).abs() < 1e-12);
        assert!((nodes.abscissas[4] - b).abs() < 1e-12);
        let ratio = nodes.abscissas[1] / nodes.abscissas[0];
        for i in 1..4 {
            assert!((nodes.abscissas[i + 1] / nodes.abscissas[i] - ratio).abs() < 1e-12);
        }
    }

    #[test]
    fn simpson_mean_converges_for_lognormal() {
        let nodes = build(Shape::Lognormal, QuadratureRule::Simpson, 101, 1.0, 0.3).unwrap();
        let exact = (0.3_f64 * 0.3 / 2.0).exp();
        assert!((mean_radius(&nodes) - exact).abs() < 1e-3);
    }

    #[test]
    fn simpson_rejects_missed_mass() {
        let err = build(Shape::Normal, QuadratureRule::Simpson, 2, 5.0, 0.01).unwrap_err();
        assert!(matches!(err, PopulationError::DegeneratePdf { .. }));
    }

    #[test]
    fn simpson_rejects_negative_support() {
        let err = build(Shape::Lognormal, QuadratureRule::Simpson, 5, 0.1, 0.3).unwrap_err();
        assert!(matches!(err, PopulationError::InvalidSupport { .. }));
    }

    #[test]
    fn legendre_three_point_rule() {
        let (x, w) = legendre_nodes(3).unwrap();
        let r = (0.6_f64).sqrt();
        assert!((x[0] + r).abs() < 1e-14);
        assert!(x[1].abs() < 1e-14);
        assert!((x[2] - r).abs() < 1e-14);
        assert!((w[0] - 5.0 / 9.0).abs() < 1e-13);
        assert!((w[1] - 8.0 / 9.0).abs() < 1e-13);
    }

    #[test]
    fn legendre_weights_integrate_polynomials() {
        let (x, w) = legendre_nodes(6).unwrap();
        assert!((w.sum() - 2.0).abs() < 1e-12);
        // ∫ z^4 dz over [-1, 1]
        let quartic: f64 = x.iter().zip(w.iter()).map(|(z, wi)| wi * z.powi(4)).sum();
        assert!((quartic - 0.4).abs() < 1e-12);
    }

    #[test]
    fn gauss_legendre_weights_sum_to_one() {
        let nodes = build(Shape::Normal, QuadratureRule::GaussLegendre, 12, 1.5, 0.2).unwrap();
        assert!((nodes.weight_sum() - 1.0).abs() < 1e-12);
        let lognormal = build(Shape::Lognormal, QuadratureRule::GaussLegendre, 20, 1.0, 0.3).unwrap();
        let exact = (0.3_f64 * 0.3 / 2.0).exp();
        assert!((mean_radius(&lognormal) - exact).abs() < 1e-3);
    }

    #[test]
    fn hermite_roots_are_mirrored() {
        for n in [2, 3, 6, 7, 12] {
            let (roots, weights) = hermite_nodes(n).unwrap();
            for i in 0..n {
                assert!((roots[i] + roots[n - 1 - i]).abs() < 1e-12);
                assert_eq!(weights[i], weights[n - 1 - i]);
            }
            if n % 2 == 1 {
                assert!(roots[n / 2].abs() < 1e-12);
            }
            assert!((weights.sum() - PI.sqrt()).abs() < 1e-10);
        }
    }

    #[test]
    fn gauss_hermite_requires_lognormal() {
        let err = build(Shape::Normal, QuadratureRule::GaussHermite, 4, 1.0, 0.3).unwrap_err();
        assert!(matches!(
            err,
            PopulationError::UnsupportedShape {
                shape: "normal",
                rule: "GH"
            }
        ));
    }

    #[test]
    fn gauss_hermite_radii_increase() {
        for n in 2..=24 {
            let nodes = build(Shape::Lognormal, QuadratureRule::GaussHermite, n, 1.0, 0.3).unwrap();
            for pair in nodes.abscissas.as_slice().unwrap().windows(2) {
                assert!(pair[0] < pair[1], "n = {n}: {pair:?}");
            }
        }
    }

    #[test]
    fn gauss_hermite_moments_are_spectral() {
        let sigma = 0.3_f64;
        let nodes = build(Shape::Lognormal, QuadratureRule::GaussHermite, 10, 1.0, sigma).unwrap();
        assert!((nodes.weight_sum() - 1.0).abs() < 1e-12);
        assert!((mean_radius(&nodes) - (sigma * sigma / 2.0).exp()).abs() < 1e-12);
        let second: f64 = (&nodes.weights * &nodes.abscissas.mapv(|r| r * r)).sum();
        assert!((second - (2.0 * sigma * sigma).exp()).abs() < 1e-12);
    }

    #[test]
    fn rule_names_round_trip() {
        for rule in [
            QuadratureRule::Simpson,
            QuadratureRule::GaussLegendre,
            QuadratureRule::GaussHermite,
        ] {
            assert_eq!(rule.name().parse::<QuadratureRule>().unwrap(), rule);
        }
        assert!(matches!(
            "trapezoid".parse::<QuadratureRule>(),
            Err(PopulationError::UnsupportedRule(name)) if name == "trapezoid"
        ));
    }
}
