//! Power converter models.
//!
//! An inverter with a constant DC bus and a frequency converter with a
//! three-phase diode-bridge front end are modeled under switching-cycle
//! averaging: the held switching-state space vector `q` multiplies the DC-bus
//! voltage to give the AC-side voltage.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Diode-bridge frequency converter parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrequencyConverterPars {
    /// DC-bus inductance [H]
    pub l: f64,
    /// DC-bus capacitance [F]
    pub c: f64,
    /// Grid voltage [V, line-line, rms]
    pub u_g: f64,
    /// Grid frequency [Hz]
    pub f_g: f64,
}

impl Default for FrequencyConverterPars {
    fn default() -> Self {
        Self {
            l: 2e-3,
            c: 235e-6,
            u_g: 400.0,
            f_g: 50.0,
        }
    }
}

/// Converter variant feeding the machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Converter {
    /// Lossless inverter with a stiff DC bus.
    Inverter { u_dc: f64 },
    /// Strong grid, diode bridge, and DC-link LC filter ahead of the inverter.
    DiodeBridge(FrequencyConverterPars),
}

impl Converter {
    /// AC-side voltage of the lossless inverter.
    pub fn ac_voltage(q: Complex64, u_dc: f64) -> Complex64 {
        q * u_dc
    }

    /// DC-side current of the lossless inverter.
    pub fn dc_current(q: Complex64, i_c: Complex64) -> f64 {
        1.5 * (q * i_c.conj()).re
    }

    /// Initial DC-bus state `(u_dc, i_l)`.
    pub fn initial_dc_state(&self) -> (f64, f64) {
        match self {
            Converter::Inverter { u_dc } => (*u_dc, 0.0),
            Converter::DiodeBridge(par) => (2.0_f64.sqrt() * par.u_g, 0.0),
        }
    }

    /// DC-bus voltage seen by the inverter given the converter state.
    pub fn dc_voltage(&self, u_dc_state: f64) -> f64 {
        match self {
            Converter::Inverter { u_dc } => *u_dc,
            Converter::DiodeBridge(_) => u_dc_state,
        }
    }

    /// Three-phase grid voltages at time `t` (diode bridge only).
    pub fn grid_voltages(&self, t: f64) -> [f64; 3] {
        match self {
            Converter::Inverter { .. } => [0.0; 3],
            Converter::DiodeBridge(par) => {
                let u_g_peak = (2.0 / 3.0_f64).sqrt() * par.u_g;
                let theta_g = 2.0 * PI * par.f_g * t;
                [
                    u_g_peak * theta_g.cos(),
                    u_g_peak * (theta_g - 2.0 * PI / 3.0).cos(),
                    u_g_peak * (theta_g - 4.0 * PI / 3.0).cos(),
                ]
            }
        }
    }

    /// DC-bus state derivatives `(d_u_dc, d_i_l)`.
    ///
    /// The inductor current cannot reverse through the diode bridge: its
    /// derivative is zeroed whenever the current is at or below zero and the
    /// unconstrained derivative would drive it negative.
    pub fn f(&self, t: f64, u_dc: f64, i_l: f64, i_dc: f64) -> (f64, f64) {
        match self {
            Converter::Inverter { .. } => (0.0, 0.0),
            Converter::DiodeBridge(par) => {
                let u_abc = self.grid_voltages(t);
                let u_max = u_abc.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let u_min = u_abc.iter().cloned().fold(f64::INFINITY, f64::min);
                let u_di = u_max - u_min;
                let d_u_dc = (i_l - i_dc) / par.c;
                let mut d_i_l = (u_di - u_dc) / par.l;
                if i_l <= 0.0 && d_i_l < 0.0 {
                    d_i_l = 0.0;
                }
                (d_u_dc, d_i_l)
            }
        }
    }
}
