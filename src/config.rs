//! Scenario configuration: machine, converter, controller, and the speed and
//! load profiles of the benchmark runs.

use anyhow::{ensure, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::control::{DriveCtrl, ImCtrlCfg, ImVectorCtrl, SmCtrlCfg, SmVectorCtrl};
use crate::converter::{Converter, FrequencyConverterPars};
use crate::machine::{InductionMachinePars, Machine, SynchronousMachinePars};
use crate::mechanics::MechanicsPars;
use crate::observer::ObserverCfg;
use crate::plant::Drive;
use crate::reference::Sequence;
use crate::sim::SolverCfg;

/// Benchmark drive scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ScenarioKind {
    /// 2.2-kW induction machine, observer-based vector control.
    ImSensorless,
    /// 2.2-kW permanent-magnet synchronous machine with a motion sensor.
    SmSensored,
    /// The synchronous machine drive fed through a diode bridge rectifier.
    SmDiodeBridge,
}

/// Full configuration of one simulation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScenarioCfg {
    pub kind: ScenarioKind,
    /// Sampling period [s]
    pub t_s: f64,
    /// Simulated span [s]
    pub t_stop: f64,
    pub solver: SolverCfg,
    /// Seed for the measurement-noise generator
    pub seed: u64,
    /// Standard deviation of the current measurement noise [A]
    pub i_noise_std: f64,
    /// Estimate the rotor speed instead of measuring it (induction drive).
    pub sensorless: bool,
    /// Use the full-order observer instead of the reduced-order one.
    pub full_order: bool,
    /// Speed profile amplitude relative to nominal speed.
    pub speed_scale: f64,
    /// Load profile amplitude relative to nominal torque.
    pub load_scale: f64,
}

impl Default for ScenarioCfg {
    fn default() -> Self {
        Self {
            kind: ScenarioKind::ImSensorless,
            t_s: 250e-6,
            t_stop: 4.0,
            solver: SolverCfg::default(),
            seed: 17,
            i_noise_std: 0.0,
            sensorless: true,
            full_order: false,
            speed_scale: 1.0,
            load_scale: 1.0,
        }
    }
}

impl ScenarioCfg {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.t_s > 0.0, "sampling period must be positive");
        ensure!(
            self.t_stop >= self.t_s,
            "simulated span must cover at least one sampling period"
        );
        ensure!(self.solver.rtol > 0.0, "relative tolerance must be positive");
        ensure!(self.solver.atol > 0.0, "absolute tolerance must be positive");
        ensure!(self.i_noise_std >= 0.0, "noise level must be non-negative");
        ensure!(
            self.speed_scale.abs() <= 2.0,
            "speed scale beyond twice nominal is outside the model's validity"
        );
        ensure!(
            (0.0..=2.0).contains(&self.load_scale),
            "load scale must lie in [0, 2]"
        );
        ensure!(
            self.sensorless || !self.full_order,
            "the full-order observer requires the sensorless configuration"
        );
        Ok(())
    }

    /// Nominal electrical speed of the scenario's machine [rad/s].
    pub fn w_nom(&self) -> f64 {
        match self.kind {
            ScenarioKind::ImSensorless => 2.0 * PI * 50.0,
            ScenarioKind::SmSensored | ScenarioKind::SmDiodeBridge => 2.0 * PI * 75.0,
        }
    }

    /// Nominal torque of the scenario's machine [Nm].
    pub fn tau_nom(&self) -> f64 {
        match self.kind {
            ScenarioKind::ImSensorless => 14.6,
            ScenarioKind::SmSensored | ScenarioKind::SmDiodeBridge => 14.0,
        }
    }

    /// Electrical speed reference profile.
    ///
    /// The inverter-fed scenarios run the acceleration-reversal benchmark;
    /// the diode-bridge scenario ramps up once and holds, since the bridge
    /// cannot absorb braking power.
    pub fn speed_profile(&self) -> Sequence {
        let w = self.speed_scale * self.w_nom();
        let t = self.t_stop;
        match self.kind {
            ScenarioKind::ImSensorless | ScenarioKind::SmSensored => Sequence::new(
                vec![
                    0.0,
                    0.125 * t,
                    0.25 * t,
                    0.375 * t,
                    0.5 * t,
                    0.625 * t,
                    0.75 * t,
                    0.875 * t,
                    t,
                ],
                vec![0.0, 0.0, w, w, 0.0, -w, -w, 0.0, 0.0],
            ),
            ScenarioKind::SmDiodeBridge => Sequence::new(
                vec![0.0, 0.1 * t, 0.2 * t, t],
                vec![0.0, 0.0, w, w],
            ),
        }
    }

    /// Load torque profile.
    pub fn load_profile(&self) -> Sequence {
        let tau = self.load_scale * self.tau_nom();
        let t = self.t_stop;
        match self.kind {
            ScenarioKind::ImSensorless | ScenarioKind::SmSensored => Sequence::new(
                vec![0.0, 0.125 * t, 0.125 * t, 0.875 * t, 0.875 * t, t],
                vec![0.0, 0.0, tau, tau, 0.0, 0.0],
            ),
            ScenarioKind::SmDiodeBridge => Sequence::new(
                vec![0.0, 0.6 * t, 0.6 * t, t],
                vec![0.0, 0.0, tau, tau],
            ),
        }
    }

    /// Build the plant model and the controller for this scenario.
    pub fn build(&self) -> Result<(Drive, DriveCtrl)> {
        self.validate()?;
        match self.kind {
            ScenarioKind::ImSensorless => {
                let par = InductionMachinePars::default();
                let mdl = Drive {
                    machine: Machine::Induction(par),
                    mechanics: MechanicsPars::default(),
                    converter: Converter::Inverter { u_dc: 540.0 },
                    tau_l: self.load_profile(),
                };
                let ctrl_cfg = ImCtrlCfg {
                    t_s: self.t_s,
                    observer: ObserverCfg {
                        sensorless: self.sensorless,
                        ..ObserverCfg::default()
                    },
                    full_order: self.full_order,
                    ..ImCtrlCfg::default()
                };
                let ctrl = ImVectorCtrl::new(par, ctrl_cfg, self.speed_profile())?;
                Ok((mdl, DriveCtrl::Im(ctrl)))
            }
            ScenarioKind::SmSensored => {
                let par = SynchronousMachinePars::default();
                let mdl = Drive {
                    machine: Machine::Synchronous(par),
                    mechanics: MechanicsPars::default(),
                    converter: Converter::Inverter { u_dc: 540.0 },
                    tau_l: self.load_profile(),
                };
                let ctrl_cfg = SmCtrlCfg {
                    t_s: self.t_s,
                    ..SmCtrlCfg::default()
                };
                let ctrl = SmVectorCtrl::new(par, ctrl_cfg, self.speed_profile());
                Ok((mdl, DriveCtrl::Sm(ctrl)))
            }
            ScenarioKind::SmDiodeBridge => {
                let par = SynchronousMachinePars::default();
                let mdl = Drive {
                    machine: Machine::Synchronous(par),
                    mechanics: MechanicsPars::default(),
                    converter: Converter::DiodeBridge(FrequencyConverterPars::default()),
                    tau_l: self.load_profile(),
                };
                let ctrl_cfg = SmCtrlCfg {
                    t_s: self.t_s,
                    ..SmCtrlCfg::default()
                };
                let ctrl = SmVectorCtrl::new(par, ctrl_cfg, self.speed_profile());
                Ok((mdl, DriveCtrl::Sm(ctrl)))
            }
        }
    }
}
