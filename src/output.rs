//! Run artifacts: CSV log, JSON summary, and overview plots.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use plotters::prelude::*;
use serde::Serialize;

use crate::config::ScenarioCfg;
use crate::sim::SimRecord;

/// Aggregate figures of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    /// RMS speed tracking error [rad/s]
    pub speed_rmse_radps: f64,
    /// RMS error of the controller's speed estimate [rad/s]
    pub speed_est_rmse_radps: f64,
    /// Peak stator current magnitude [A]
    pub peak_current_a: f64,
    /// Peak electromagnetic torque magnitude [Nm]
    pub peak_torque_nm: f64,
    /// DC-bus voltage at the end of the run [V]
    pub final_dc_voltage_v: f64,
    /// Smallest rotor flux estimate after the flux has been built up [Vs]
    pub min_rotor_flux_vs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub config: ScenarioCfg,
    pub samples: usize,
    pub metrics: Metrics,
    pub outputs: OutputFiles,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputFiles {
    pub output_dir: PathBuf,
    pub csv_path: PathBuf,
    pub summary_path: PathBuf,
    pub plot_speed_path: PathBuf,
    pub plot_current_path: PathBuf,
    pub plot_dc_bus_path: PathBuf,
}

impl OutputFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            output_dir: dir.to_path_buf(),
            csv_path: dir.join("log.csv"),
            summary_path: dir.join("summary.json"),
            plot_speed_path: dir.join("speed.png"),
            plot_current_path: dir.join("current.png"),
            plot_dc_bus_path: dir.join("dc_bus.png"),
        }
    }
}

pub fn write_csv(path: &Path, records: &[SimRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open CSV path {}", path.display()))?;

    for record in records {
        writer.serialize(record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_summary(path: &Path, summary: &Summary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = serde_json::to_string_pretty(summary)?;
    fs::write(path, data)?;
    Ok(())
}

pub fn make_plots(records: &[SimRecord], files: &OutputFiles) -> anyhow::Result<()> {
    plot_speed(records, &files.plot_speed_path)?;
    plot_current(records, &files.plot_current_path)?;
    plot_dc_bus(records, &files.plot_dc_bus_path)?;
    Ok(())
}

fn time_axis(records: &[SimRecord]) -> f64 {
    records.last().map(|r| r.t).unwrap_or(1.0).max(1e-6)
}

fn plot_speed(records: &[SimRecord], path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_time = time_axis(records);
    let w_max = records
        .iter()
        .flat_map(|r| [r.w_m, r.w_m_est, r.w_m_ref])
        .fold(1.0_f64, |acc, w| acc.max(w.abs()));

    let mut chart = ChartBuilder::on(&root)
        .caption("Electrical Rotor Speed", ("sans-serif", 34).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..max_time, -1.1 * w_max..1.1 * w_max)?;

    chart
        .configure_mesh()
        .x_desc("Time [s]")
        .y_desc("Speed [rad/s]")
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            records.iter().map(|r| (r.t, r.w_m_ref)),
            &BLACK,
        ))?
        .label("Reference")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], BLACK.stroke_width(3)));

    chart
        .draw_series(LineSeries::new(records.iter().map(|r| (r.t, r.w_m)), &BLUE))?
        .label("Measured")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], BLUE.stroke_width(3)));

    chart
        .draw_series(LineSeries::new(
            records.iter().map(|r| (r.t, r.w_m_est)),
            &RED,
        ))?
        .label("Controller")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], RED.stroke_width(3)));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .border_style(BLACK)
        .background_style(WHITE.mix(0.7))
        .draw()?;

    root.present()?;
    Ok(())
}

fn plot_current(records: &[SimRecord], path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_time = time_axis(records);
    let i_max = records
        .iter()
        .flat_map(|r| [r.i_s_abs, r.i_sd.abs(), r.i_sq.abs()])
        .fold(1.0_f64, f64::max);

    let mut chart = ChartBuilder::on(&root)
        .caption("Stator Current", ("sans-serif", 34).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..max_time, -1.1 * i_max..1.1 * i_max)?;

    chart
        .configure_mesh()
        .x_desc("Time [s]")
        .y_desc("Current [A]")
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            records.iter().map(|r| (r.t, r.i_s_abs)),
            &BLACK,
        ))?
        .label("|i_s|")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], BLACK.stroke_width(3)));

    chart
        .draw_series(LineSeries::new(records.iter().map(|r| (r.t, r.i_sd)), &BLUE))?
        .label("i_sd")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], BLUE.stroke_width(3)));

    chart
        .draw_series(LineSeries::new(records.iter().map(|r| (r.t, r.i_sq)), &RED))?
        .label("i_sq")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], RED.stroke_width(3)));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .border_style(BLACK)
        .background_style(WHITE.mix(0.7))
        .draw()?;

    root.present()?;
    Ok(())
}

fn plot_dc_bus(records: &[SimRecord], path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_time = time_axis(records);
    let u_max = records.iter().map(|r| r.u_dc).fold(1.0_f64, f64::max);

    let mut chart = ChartBuilder::on(&root)
        .caption("DC Bus", ("sans-serif", 34).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..max_time, 0.0..1.2 * u_max)?;

    chart
        .configure_mesh()
        .x_desc("Time [s]")
        .y_desc("Voltage [V] / Current [A]")
        .draw()?;

    chart
        .draw_series(LineSeries::new(records.iter().map(|r| (r.t, r.u_dc)), &BLUE))?
        .label("u_dc")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], BLUE.stroke_width(3)));

    chart
        .draw_series(LineSeries::new(records.iter().map(|r| (r.t, r.i_l)), &RED))?
        .label("i_L")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], RED.stroke_width(3)));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .border_style(BLACK)
        .background_style(WHITE.mix(0.7))
        .draw()?;

    root.present()?;
    Ok(())
}
