use std::cell::Cell;
use std::fs;

use bubblepop::config::IntegratorConfig;
use bubblepop::output::{self, RunRecord};
use bubblepop::{
    BubbleDynamics, EnsembleState, MomentSpec, PopulationConfig, PopulationError, QuadratureRule,
    Scheme, Shape, SimulationConfig, TimeAdvancer, Waveform, ZeroModel,
};

fn no_forcing(_: f64) -> f64 {
    0.0
}

#[test]
fn zero_rhs_population_round_trip() {
    let population = PopulationConfig {
        node_count: 5,
        shape: Shape::Lognormal,
        binning: QuadratureRule::Simpson,
        ..PopulationConfig::default()
    };
    let integrator = IntegratorConfig {
        t_final: Some(1.0),
        dt: Some(0.1),
        method: Scheme::Euler,
        ..IntegratorConfig::default()
    };

    let ensemble = EnsembleState::from_config(&population, ZeroModel::at_rest).unwrap();
    let initial = ensemble.values().to_owned();
    let mut advancer = TimeAdvancer::from_config(&integrator, ensemble, no_forcing).unwrap();
    let summary = advancer.run().unwrap();

    assert_eq!(summary.steps, 10);
    assert_eq!(advancer.history().len(), 10);
    assert_eq!(advancer.history().times().len(), advancer.history().snapshots().len());
    assert_eq!(advancer.history().times()[0], 0.0);
    assert!(advancer.time() >= 1.0);
    assert_eq!(advancer.ensemble().values(), initial);
}

#[test]
fn conflicting_filters_fail_before_any_node_is_built() {
    let population = PopulationConfig {
        node_count: 5,
        n_filt: Some(3),
        t_filt: Some(2.0),
        ..PopulationConfig::default()
    };
    let built = Cell::new(0);
    let result = EnsembleState::from_config(&population, |r| {
        built.set(built.get() + 1);
        ZeroModel::at_rest(r)
    });

    assert!(matches!(result, Err(PopulationError::ConflictingFilterConfig)));
    assert_eq!(built.get(), 0);
}

#[test]
fn zeroth_moment_is_one_for_every_rule() {
    for binning in [
        QuadratureRule::Simpson,
        QuadratureRule::GaussLegendre,
        QuadratureRule::GaussHermite,
    ] {
        let population = PopulationConfig {
            node_count: 15,
            binning,
            ..PopulationConfig::default()
        };
        let ensemble = EnsembleState::from_config(&population, ZeroModel::at_rest).unwrap();
        let m0 = ensemble.moments().unwrap()[0];
        assert!((m0 - 1.0).abs() < 1e-12, "{binning:?}: {m0}");
    }
}

#[test]
fn time_filtered_moments_after_forced_run() {
    let population = PopulationConfig {
        node_count: 9,
        binning: QuadratureRule::GaussHermite,
        moments: vec![vec![0, 0], vec![1, 0]],
        t_filt: Some(1.0),
        ..PopulationConfig::default()
    };
    let integrator = IntegratorConfig {
        t_final: Some(6.0),
        dt: Some(0.01),
        method: Scheme::Rk3,
        ..IntegratorConfig::default()
    };
    let forcing = Waveform::Sine {
        amplitude: 0.02,
        period: 3.0,
        phase: 0.0,
    };

    let ensemble = EnsembleState::from_config(&population, BubbleDynamics::linear).unwrap();
    let mut advancer = TimeAdvancer::from_config(&integrator, ensemble, forcing).unwrap();
    advancer.run().unwrap();

    let filtered = advancer.filtered_moments().unwrap();
    let plain = advancer.moments().unwrap();
    assert!((filtered[0] - 1.0).abs() < 1e-12);
    // small forcing keeps the mean radius near its equilibrium value
    assert!((filtered[1] - plain[1]).abs() < 0.05);
}

#[test]
fn filtered_radius_moments_are_rejected() {
    let population = PopulationConfig {
        node_count: 3,
        binning: QuadratureRule::GaussHermite,
        n_filt: Some(2),
        ..PopulationConfig::default()
    };
    let integrator = IntegratorConfig {
        t_final: Some(0.1),
        dt: Some(0.05),
        ..IntegratorConfig::default()
    };
    let mut ensemble = EnsembleState::from_config(&population, ZeroModel::at_rest).unwrap();
    ensemble.set_moment_specs(vec![MomentSpec::Pqr(1, 0, 1)]);
    let mut advancer = TimeAdvancer::from_config(&integrator, ensemble, no_forcing).unwrap();
    advancer.run().unwrap();

    assert!(matches!(
        advancer.filtered_moments(),
        Err(PopulationError::UnsupportedMomentShape { arity: 3, .. })
    ));
}

#[test]
fn outputs_cover_the_whole_history() {
    let mut config = SimulationConfig::default();
    config.population.node_count = 4;
    config.integrator.t_final = Some(0.5);
    config.integrator.dt = Some(0.05);
    config.integrator.method = Scheme::Rk2;
    config.validate().unwrap();

    let model = config.model;
    let ensemble = EnsembleState::from_config(&config.population, |r0| model.make(r0)).unwrap();
    let mut advancer =
        TimeAdvancer::from_config(&config.integrator, ensemble, config.waveform).unwrap();
    let summary = advancer.run().unwrap();

    let root = tempfile::tempdir().unwrap();
    let dir = output::create_timestamped_output_dir(root.path()).unwrap();
    let history = advancer.history();
    output::write_history_csv(&dir.join("history.csv"), history, advancer.ensemble().radii())
        .unwrap();
    output::write_moments_csv(
        &dir.join("moments.csv"),
        history.times(),
        advancer.moment_series().unwrap().view(),
    )
    .unwrap();
    output::write_summary_json(
        &dir.join("summary.json"),
        &RunRecord {
            config: &config,
            summary: &summary,
            final_moments: advancer.moments().unwrap().to_vec(),
        },
    )
    .unwrap();

    let history_rows = fs::read_to_string(dir.join("history.csv")).unwrap().lines().count();
    assert_eq!(history_rows, 1 + 4 * history.len());

    let moments = fs::read_to_string(dir.join("moments.csv")).unwrap();
    assert_eq!(moments.lines().next(), Some("time,m0,m1,m2,m3"));
    assert_eq!(moments.lines().count(), 1 + history.len());

    let summary_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary_json["summary"]["scheme"], "RK2");
    assert_eq!(summary_json["config"]["population"]["NR0"], 4);
    assert_eq!(summary_json["summary"]["steps"], 10);
}

#[test]
fn sample_filter_averages_the_end_of_the_run() {
    let population = PopulationConfig {
        node_count: 5,
        binning: QuadratureRule::GaussHermite,
        moments: vec![vec![0, 0], vec![1, 0]],
        n_filt: Some(3),
        ..PopulationConfig::default()
    };
    let integrator = IntegratorConfig {
        t_final: Some(20.0),
        dt: Some(0.01),
        method: Scheme::Rk3,
        ..IntegratorConfig::default()
    };
    let forcing = Waveform::Sine {
        amplitude: 0.2,
        period: 3.0,
        phase: 0.0,
    };

    let ensemble = EnsembleState::from_config(&population, BubbleDynamics::linear).unwrap();
    let initial = ensemble.moments().unwrap();
    let mut advancer = TimeAdvancer::from_config(&integrator, ensemble, forcing).unwrap();
    advancer.run().unwrap();

    let series = advancer.moment_series().unwrap();
    let rows = series.nrows();
    let tail_mean = (series[[rows - 3, 1]] + series[[rows - 2, 1]] + series[[rows - 1, 1]]) / 3.0;

    let filtered = advancer.filtered_moments().unwrap();
    assert!((filtered[0] - 1.0).abs() < 1e-12);
    assert!((filtered[1] - tail_mean).abs() < 1e-12);
    assert!((filtered[1] - initial[1]).abs() > 1e-6);
}
