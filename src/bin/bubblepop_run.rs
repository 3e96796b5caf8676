use std::path::PathBuf;

use anyhow::Context;
use bubblepop::output::{self, RunRecord};
use bubblepop::{EnsembleState, Scheme, SimulationConfig, TimeAdvancer};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Quadrature-based bubble population simulation")]
struct Cli {
    /// JSON configuration; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output base directory
    #[arg(long, default_value = "output-bubblepop")]
    output: PathBuf,

    /// Final simulation time
    #[arg(long)]
    t_final: Option<f64>,

    /// Initial integration step
    #[arg(long)]
    dt: Option<f64>,

    /// Time-stepping scheme (Euler, RK2, RK3, RK12, RK23)
    #[arg(long)]
    method: Option<Scheme>,

    /// Number of quadrature nodes
    #[arg(long)]
    nodes: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => SimulationConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    if let Some(v) = cli.t_final {
        cfg.integrator.t_final = Some(v);
    }
    if let Some(v) = cli.dt {
        cfg.integrator.dt = Some(v);
    }
    if let Some(v) = cli.method {
        cfg.integrator.method = v;
    }
    if let Some(v) = cli.nodes {
        cfg.population.node_count = v;
    }
    cfg.validate().context("invalid configuration")?;

    let model = cfg.model;
    let ensemble = EnsembleState::from_config(&cfg.population, |r0| model.make(r0))?;
    let mut advancer = TimeAdvancer::from_config(&cfg.integrator, ensemble, cfg.waveform)?;
    let summary = advancer.run().context("integration failed")?;

    let output_dir = output::create_timestamped_output_dir(&cli.output)?;
    let ensemble = advancer.ensemble();
    let history = advancer.history();
    output::write_nodes_csv(&output_dir.join("nodes.csv"), ensemble.nodes())?;
    output::write_history_csv(&output_dir.join("history.csv"), history, ensemble.radii())?;
    output::write_moments_csv(
        &output_dir.join("moments.csv"),
        history.times(),
        advancer.moment_series()?.view(),
    )?;

    let final_moments = advancer.moments()?.to_vec();
    output::write_summary_json(
        &output_dir.join("summary.json"),
        &RunRecord {
            config: &cfg,
            summary: &summary,
            final_moments,
        },
    )?;

    println!(
        "Simulation complete. Steps: {} | t = {:.4} | {}",
        summary.steps, summary.final_time, summary.scheme
    );
    println!("Run directory: {}", output_dir.display());
    Ok(())
}
