use bubblepop::quadrature::{self, QuadratureRule};
use bubblepop::Shape;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal};

const SIGMA: f64 = 0.3;
const SAMPLES: usize = 200_000;

fn sampled_moment(power: i32) -> f64 {
    let mut rng = StdRng::seed_from_u64(2024);
    let dist = LogNormal::new(0.0, SIGMA).unwrap();
    (0..SAMPLES)
        .map(|_| dist.sample(&mut rng).powi(power))
        .sum::<f64>()
        / SAMPLES as f64
}

#[test]
fn hermite_moments_match_sampled_lognormal() {
    let nodes = quadrature::build(Shape::Lognormal, QuadratureRule::GaussHermite, 21, 1.0, SIGMA)
        .unwrap();

    for power in [1, 2, 3] {
        let quad: f64 = nodes
            .abscissas
            .iter()
            .zip(&nodes.weights)
            .map(|(r, w)| w * r.powi(power))
            .sum();
        let exact = (0.5 * f64::from(power * power) * SIGMA * SIGMA).exp();
        let sampled = sampled_moment(power);

        assert!((quad - exact).abs() < 1e-10, "power {power}: {quad} vs {exact}");
        assert!((quad - sampled).abs() < 0.01 * exact, "power {power}: {quad} vs {sampled}");
    }
}

#[test]
fn gauss_hermite_nodes_are_sorted_and_positive() {
    let nodes = quadrature::build(Shape::Lognormal, QuadratureRule::GaussHermite, 12, 1.0, SIGMA)
        .unwrap();
    assert!(nodes.abscissas.iter().all(|&r| r > 0.0));
    assert!(nodes.abscissas.windows(2).into_iter().all(|w| w[0] < w[1]));
    assert!((nodes.weight_sum() - 1.0).abs() < 1e-13);
}
