//! Electrical machine models.
//!
//! Both machines are expressed with complex space vectors. The induction
//! machine uses the inverse-Γ equivalent circuit in stationary coordinates;
//! the synchronous machine is modeled in rotor coordinates and rotated to
//! stationary coordinates at the terminals.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Inverse-Γ model parameters of an induction machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InductionMachinePars {
    /// Stator resistance [Ω]
    pub r_s: f64,
    /// Rotor resistance [Ω]
    pub r_r: f64,
    /// Leakage inductance [H]
    pub l_sgm: f64,
    /// Magnetizing inductance [H]
    pub l_m: f64,
    /// Number of pole pairs
    pub n_p: u32,
}

impl Default for InductionMachinePars {
    /// 2.2-kW 400-V induction machine.
    fn default() -> Self {
        Self {
            r_s: 3.7,
            r_r: 2.1,
            l_sgm: 0.021,
            l_m: 0.224,
            n_p: 2,
        }
    }
}

/// Synchronous machine parameters (magnetic saturation omitted).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SynchronousMachinePars {
    /// Stator resistance [Ω]
    pub r_s: f64,
    /// d-axis inductance [H]
    pub l_d: f64,
    /// q-axis inductance [H]
    pub l_q: f64,
    /// Permanent-magnet flux linkage [Vs]
    pub psi_f: f64,
    /// Number of pole pairs
    pub n_p: u32,
}

impl Default for SynchronousMachinePars {
    /// 2.2-kW 370-V permanent-magnet synchronous machine.
    fn default() -> Self {
        Self {
            r_s: 3.6,
            l_d: 0.036,
            l_q: 0.051,
            psi_f: 0.545,
            n_p: 3,
        }
    }
}

/// Result of one electrical derivative evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ElectricalSample {
    /// Derivative of the primary flux state
    pub d_psi1: Complex64,
    /// Derivative of the secondary flux state (zero for the PMSM)
    pub d_psi2: Complex64,
    /// Stator current in stationary coordinates [A]
    pub i_ss: Complex64,
    /// Electromagnetic torque [Nm]
    pub tau_m: f64,
}

/// Machine variant selected for a drive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Machine {
    Induction(InductionMachinePars),
    Synchronous(SynchronousMachinePars),
}

impl Machine {
    pub fn n_p(&self) -> u32 {
        match self {
            Machine::Induction(par) => par.n_p,
            Machine::Synchronous(par) => par.n_p,
        }
    }

    /// Initial flux states of the machine at rest.
    pub fn initial_flux(&self) -> (Complex64, Complex64) {
        match self {
            // Unmagnetized at start; the flux is built up by the controller.
            Machine::Induction(_) => (Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)),
            // Magnet flux is always present on the d-axis.
            Machine::Synchronous(par) => {
                (Complex64::new(par.psi_f, 0.0), Complex64::new(0.0, 0.0))
            }
        }
    }

    /// Compute the electrical state derivatives, stator current, and torque.
    ///
    /// For the induction machine `psi1` is the stator flux and `psi2` the
    /// rotor flux, both in stationary coordinates. For the synchronous
    /// machine `psi1` is the stator flux in rotor coordinates and `psi2` is
    /// unused. `u_ss` is the applied stator voltage in stationary
    /// coordinates, `w_m` the electrical rotor speed, and `theta_m` the
    /// electrical rotor angle.
    pub fn f(
        &self,
        psi1: Complex64,
        psi2: Complex64,
        u_ss: Complex64,
        w_m: f64,
        theta_m: f64,
    ) -> ElectricalSample {
        match self {
            Machine::Induction(par) => {
                let i_ss = (psi1 - psi2) / par.l_sgm;
                let i_rs = psi2 / par.l_m - i_ss;
                let d_psi1 = u_ss - par.r_s * i_ss;
                let d_psi2 = -par.r_r * i_rs + Complex64::new(0.0, w_m) * psi2;
                let tau_m = 1.5 * par.n_p as f64 * (i_ss * psi1.conj()).im;
                ElectricalSample {
                    d_psi1,
                    d_psi2,
                    i_ss,
                    tau_m,
                }
            }
            Machine::Synchronous(par) => {
                let u_s = Complex64::from_polar(1.0, -theta_m) * u_ss;
                let i_s =
                    Complex64::new((psi1.re - par.psi_f) / par.l_d, psi1.im / par.l_q);
                let d_psi1 = u_s - par.r_s * i_s - Complex64::new(0.0, w_m) * psi1;
                let i_ss = Complex64::from_polar(1.0, theta_m) * i_s;
                let tau_m = 1.5 * par.n_p as f64 * (i_s * psi1.conj()).im;
                ElectricalSample {
                    d_psi1,
                    d_psi2: Complex64::new(0.0, 0.0),
                    i_ss,
                    tau_m,
                }
            }
        }
    }

    /// Stator current in stationary coordinates and torque, without
    /// evaluating the derivatives. Used when sampling plant outputs.
    pub fn outputs(&self, psi1: Complex64, psi2: Complex64, theta_m: f64) -> (Complex64, f64) {
        let sample = self.f(psi1, psi2, Complex64::new(0.0, 0.0), 0.0, theta_m);
        (sample.i_ss, sample.tau_m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn induction_machine_idle_has_zero_torque() {
        let machine = Machine::Induction(InductionMachinePars::default());
        let (psi1, psi2) = machine.initial_flux();
        let sample = machine.f(psi1, psi2, Complex64::new(0.0, 0.0), 0.0, 0.0);
        assert_eq!(sample.tau_m, 0.0);
        assert_eq!(sample.i_ss, Complex64::new(0.0, 0.0));
    }

    #[test]
    fn synchronous_machine_rest_current_is_zero() {
        let machine = Machine::Synchronous(SynchronousMachinePars::default());
        let (psi1, psi2) = machine.initial_flux();
        let sample = machine.f(psi1, psi2, Complex64::new(0.0, 0.0), 0.0, 0.0);
        // psi_s = psi_f on the d-axis gives zero current and zero torque.
        assert!(sample.i_ss.norm() < 1e-12);
        assert!(sample.tau_m.abs() < 1e-12);
    }

    #[test]
    fn pmsm_torque_matches_cross_product_form() {
        let par = SynchronousMachinePars::default();
        let machine = Machine::Synchronous(par);
        let psi_s = Complex64::new(0.5, 0.2);
        let sample = machine.f(psi_s, Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0), 0.0, 0.0);
        let i_s = Complex64::new((psi_s.re - par.psi_f) / par.l_d, psi_s.im / par.l_q);
        let expected = 1.5 * par.n_p as f64 * (i_s * psi_s.conj()).im;
        assert!((sample.tau_m - expected).abs() < 1e-12);
    }

    #[test]
    fn stationary_rotation_round_trip() {
        // Rotating into rotor coordinates and back recovers the vector.
        for k in 0..16 {
            let theta = -PI + (k as f64 + 0.5) * PI / 8.0;
            let i_ss = Complex64::new(1.3, -2.4);
            let i_s = Complex64::from_polar(1.0, -theta) * i_ss;
            let back = Complex64::from_polar(1.0, theta) * i_s;
            assert!((back - i_ss).norm() < 1e-12);
        }
    }
}
