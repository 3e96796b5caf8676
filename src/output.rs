use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::Writer;
use ndarray::{ArrayView1, ArrayView2};
use serde::Serialize;

use crate::config::SimulationConfig;
use crate::integrator::{RunHistory, RunSummary};
use crate::quadrature::QuadratureNodes;
use crate::PopulationError;

/// Everything `summary.json` records about one run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord<'a> {
    pub config: &'a SimulationConfig,
    pub summary: &'a RunSummary,
    pub final_moments: Vec<f64>,
}

/// Creates a fresh `run-<UTC stamp>` directory under `root`. Runs started in
/// the same second get a `-<n>` suffix.
pub fn create_timestamped_output_dir(root: &Path) -> Result<PathBuf, PopulationError> {
    fs::create_dir_all(root)?;

    let stem = format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S"));
    let mut suffix = 0_u32;
    loop {
        let candidate = match suffix {
            0 => root.join(&stem),
            n => root.join(format!("{stem}-{n}")),
        };
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
            Err(err) => return Err(err.into()),
        }
    }
}

fn cell(value: f64) -> String {
    format!("{value:.10}")
}

pub fn write_nodes_csv(path: &Path, nodes: &QuadratureNodes) -> Result<(), PopulationError> {
    if nodes.weights.len() != nodes.abscissas.len() {
        return Err(PopulationError::LengthMismatch {
            context: "node weights",
            expected: nodes.abscissas.len(),
            got: nodes.weights.len(),
        });
    }

    let mut writer = Writer::from_path(path)?;
    writer.write_record(["node", "radius", "weight"])?;
    for (idx, (radius, weight)) in nodes.abscissas.iter().zip(&nodes.weights).enumerate() {
        writer.write_record([idx.to_string(), cell(*radius), cell(*weight)])?;
    }

    writer.flush()?;
    Ok(())
}

/// Long format: one row per recorded time and node.
pub fn write_history_csv(
    path: &Path,
    history: &RunHistory,
    radii: ArrayView1<'_, f64>,
) -> Result<(), PopulationError> {
    let state_dim = history.snapshots().first().map_or(0, |s| s.ncols());

    let mut writer = Writer::from_path(path)?;
    let mut header = vec!["time".to_string(), "node".to_string(), "radius".to_string()];
    header.extend((0..state_dim).map(|c| format!("x{c}")));
    writer.write_record(&header)?;

    for (&time, snapshot) in history.times().iter().zip(history.snapshots()) {
        if snapshot.dim() != (radii.len(), state_dim) {
            return Err(PopulationError::TableShapeMismatch {
                expected: (radii.len(), state_dim),
                got: snapshot.dim(),
            });
        }

        for (node, row) in snapshot.outer_iter().enumerate() {
            let mut record = Vec::with_capacity(3 + state_dim);
            record.push(cell(time));
            record.push(node.to_string());
            record.push(cell(radii[node]));
            record.extend(row.iter().copied().map(cell));
            writer.write_record(&record)?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// One row per time with columns `m0, m1, ...` in moment order.
pub fn write_moments_csv(
    path: &Path,
    times: &[f64],
    series: ArrayView2<'_, f64>,
) -> Result<(), PopulationError> {
    if series.nrows() != times.len() {
        return Err(PopulationError::LengthMismatch {
            context: "moment rows",
            expected: times.len(),
            got: series.nrows(),
        });
    }

    let mut writer = Writer::from_path(path)?;
    let mut header = vec!["time".to_string()];
    header.extend((0..series.ncols()).map(|k| format!("m{k}")));
    writer.write_record(&header)?;

    for (&time, row) in times.iter().zip(series.outer_iter()) {
        let mut record = vec![cell(time)];
        record.extend(row.iter().copied().map(cell));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_summary_json(path: &Path, record: &RunRecord<'_>) -> Result<(), PopulationError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, record)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array2};

    use super::*;

    #[test]
    fn history_csv_is_long_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let mut history = RunHistory::default();
        history.push(0.0, array![[1.0, 0.0], [2.0, 0.0]]);
        history.push(0.5, array![[1.5, 0.25], [2.5, -0.25]]);

        write_history_csv(&path, &history, array![1.0, 2.0].view()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "time,node,radius,x0,x1");
        assert_eq!(
            lines[4],
            "0.5000000000,1,2.0000000000,2.5000000000,-0.2500000000"
        );
    }

    #[test]
    fn mismatched_lengths_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_moments_csv(
            &dir.path().join("moments.csv"),
            &[0.0, 1.0, 2.0],
            Array2::zeros((2, 1)).view(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PopulationError::LengthMismatch {
                expected: 3,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn output_dirs_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let first = create_timestamped_output_dir(root.path()).unwrap();
        let second = create_timestamped_output_dir(root.path()).unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
        for dir in [&first, &second] {
            let name = dir.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with("run-"), "{name}");
        }
    }

    #[test]
    fn history_rows_must_match_the_radii() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = RunHistory::default();
        history.push(0.0, array![[1.0, 0.0], [2.0, 0.0]]);

        let err = write_history_csv(
            &dir.path().join("history.csv"),
            &history,
            array![1.0, 2.0, 3.0].view(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PopulationError::TableShapeMismatch {
                expected: (3, 2),
                got: (2, 2),
            }
        ));
    }
}
