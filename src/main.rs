use std::path::PathBuf;

use clap::Parser;
use drivesim::config::{ScenarioCfg, ScenarioKind};
use drivesim::run_scenario;

#[derive(Debug, Parser)]
#[command(author, version, about = "Sampled-data simulation of vector-controlled machine drives")]
struct Cli {
    /// Scenario to simulate
    #[arg(long, value_enum, default_value = "im-sensorless")]
    scenario: ScenarioKind,

    /// Output base directory (relative paths are resolved from the crate root)
    #[arg(long, default_value = "output-drivesim")]
    output: PathBuf,

    /// Sampling period in seconds
    #[arg(long)]
    t_s: Option<f64>,

    /// Simulated span in seconds
    #[arg(long)]
    t_stop: Option<f64>,

    /// Speed profile amplitude relative to nominal speed
    #[arg(long)]
    speed_scale: Option<f64>,

    /// Load profile amplitude relative to nominal torque
    #[arg(long)]
    load_scale: Option<f64>,

    /// Standard deviation of current measurement noise in amperes
    #[arg(long)]
    noise: Option<f64>,

    /// Use the measured rotor speed in the induction drive
    #[arg(long)]
    sensored: bool,

    /// Use the full-order observer instead of the reduced-order one
    #[arg(long)]
    full_order: bool,

    /// Random seed for the measurement noise
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = ScenarioCfg {
        kind: cli.scenario,
        ..ScenarioCfg::default()
    };
    if let Some(v) = cli.t_s {
        cfg.t_s = v;
    }
    if let Some(v) = cli.t_stop {
        cfg.t_stop = v;
    }
    if let Some(v) = cli.speed_scale {
        cfg.speed_scale = v;
    }
    if let Some(v) = cli.load_scale {
        cfg.load_scale = v;
    }
    if let Some(v) = cli.noise {
        cfg.i_noise_std = v;
    }
    if cli.sensored {
        cfg.sensorless = false;
    }
    cfg.full_order = cli.full_order;
    if let Some(v) = cli.seed {
        cfg.seed = v;
    }

    let summary = run_scenario(&cfg, &cli.output)?;

    println!(
        "Simulation complete. Samples: {} | Speed RMSE: {:.2} rad/s | Peak current: {:.2} A",
        summary.samples, summary.metrics.speed_rmse_radps, summary.metrics.peak_current_a
    );
    println!("Run directory: {}", summary.outputs.output_dir.display());
    println!("CSV: {}", summary.outputs.csv_path.display());
    println!("Summary: {}", summary.outputs.summary_path.display());
    println!("Speed plot: {}", summary.outputs.plot_speed_path.display());
    println!("Current plot: {}", summary.outputs.plot_current_path.display());
    println!("DC-bus plot: {}", summary.outputs.plot_dc_bus_path.display());

    Ok(())
}
