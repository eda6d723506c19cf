//! Sampled-data simulation of vector-controlled electrical machine drives.
//!
//! A continuous-time plant (machine, converter, mechanics) is integrated with
//! a variable-step solver between the sampling instants of a discrete-time
//! controller whose output is held constant over each period. The induction
//! machine drive runs sensorless from a flux observer; the synchronous
//! machine drive uses a motion sensor and optimal current references.

pub mod config;
pub mod control;
pub mod converter;
pub mod machine;
pub mod mechanics;
pub mod observer;
pub mod output;
pub mod plant;
pub mod reference;
pub mod sim;

use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;

use crate::config::ScenarioCfg;
use crate::output::{make_plots, write_csv, write_summary, Metrics, OutputFiles, Summary};
use crate::plant::SensorNoise;
use crate::sim::{SimRecord, Simulation};

pub use crate::config::ScenarioKind;
pub use crate::control::{ControlSystem, DriveCtrl, Measurement};
pub use crate::observer::{Feedback, FluxObserver};
pub use crate::plant::Drive;

/// Wrap an angle to the interval (-pi, pi].
pub fn wrap(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Run one scenario end to end and write the artifacts into a timestamped
/// directory under `output_dir`.
pub fn run_scenario(cfg: &ScenarioCfg, output_dir: &Path) -> anyhow::Result<Summary> {
    cfg.validate()?;
    let output_base_dir = resolve_output_base_dir(output_dir);
    let run_dir = create_timestamped_run_dir(&output_base_dir)?;

    let (mdl, ctrl) = cfg.build()?;
    let noise = SensorNoise::new(cfg.seed, cfg.i_noise_std);
    let mut sim = Simulation::new(mdl, ctrl, cfg.solver, noise);
    let records = sim.run(cfg.t_stop)?;

    let files = OutputFiles::in_dir(&run_dir);
    let summary = Summary {
        config: *cfg,
        samples: records.len(),
        metrics: compute_metrics(&records),
        outputs: files.clone(),
    };

    write_csv(&files.csv_path, &records)?;
    write_summary(&files.summary_path, &summary)?;
    make_plots(&records, &files)?;

    Ok(summary)
}

fn compute_metrics(records: &[SimRecord]) -> Metrics {
    let mut track_sq = 0.0;
    let mut est_sq = 0.0;
    let mut peak_i = 0.0_f64;
    let mut peak_tau = 0.0_f64;
    let mut min_psi_r = f64::INFINITY;
    let mut count = 0.0_f64;
    let mut flux_built = false;

    for r in records {
        track_sq += (r.w_m - r.w_m_ref).powi(2);
        est_sq += (r.w_m_est - r.w_m).powi(2);
        peak_i = peak_i.max(r.i_s_abs);
        peak_tau = peak_tau.max(r.tau_m.abs());
        // Skip the magnetization transient at the start of the run.
        if r.psi_r > 0.1 {
            flux_built = true;
        }
        if flux_built {
            min_psi_r = min_psi_r.min(r.psi_r);
        }
        count += 1.0;
    }

    let n = count.max(1.0);
    Metrics {
        speed_rmse_radps: (track_sq / n).sqrt(),
        speed_est_rmse_radps: (est_sq / n).sqrt(),
        peak_current_a: peak_i,
        peak_torque_nm: peak_tau,
        final_dc_voltage_v: records.last().map(|r| r.u_dc).unwrap_or(0.0),
        min_rotor_flux_vs: if min_psi_r.is_finite() { min_psi_r } else { 0.0 },
    }
}

pub fn workspace_root_dir() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .to_path_buf()
        .canonicalize()
        .unwrap_or_else(|_| manifest_dir.to_path_buf())
}

pub fn default_output_base_dir() -> PathBuf {
    workspace_root_dir().join("output-drivesim")
}

fn resolve_output_base_dir(requested: &Path) -> PathBuf {
    if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        workspace_root_dir().join(requested)
    }
}

fn create_timestamped_run_dir(base_dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(base_dir)
        .with_context(|| format!("failed to create output base directory {}", base_dir.display()))?;

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let run_dir = base_dir.join(&timestamp);
    if !run_dir.exists() {
        fs::create_dir_all(&run_dir)?;
        return Ok(run_dir);
    }

    let mut counter: usize = 1;
    loop {
        let candidate = base_dir.join(format!("{timestamp}-{counter:02}"));
        if !candidate.exists() {
            fs::create_dir_all(&candidate)?;
            return Ok(candidate);
        }
        counter += 1;
    }
}
