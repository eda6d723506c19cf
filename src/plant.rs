//! Continuous-time plant model of the drive.
//!
//! The plant collects the machine, the converter, and the mechanics into one
//! state vector that the variable-step solver integrates over each sampling
//! period while the switching-state vector is held constant.

use nalgebra::SVector;
use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::control::Measurement;
use crate::converter::Converter;
use crate::machine::Machine;
use crate::mechanics::MechanicsPars;
use crate::reference::Sequence;
use crate::wrap;

/// Plant state vector.
///
/// Layout: `[psi1_re, psi1_im, psi2_re, psi2_im, w_M, theta_M, u_dc, i_L]`
/// with mechanical speed and angle; the rotor angle is left unwrapped so the
/// solver sees a smooth trajectory.
pub type PlantState = SVector<f64, 8>;

pub const PSI1_RE: usize = 0;
pub const PSI1_IM: usize = 1;
pub const PSI2_RE: usize = 2;
pub const PSI2_IM: usize = 3;
pub const W_M: usize = 4;
pub const THETA_M: usize = 5;
pub const U_DC: usize = 6;
pub const I_L: usize = 7;

/// Additive measurement noise on the sampled stator current.
pub struct SensorNoise {
    rng: ChaCha8Rng,
    dist: Normal<f64>,
}

impl SensorNoise {
    /// `None` when the standard deviation is not positive.
    pub fn new(seed: u64, std: f64) -> Option<Self> {
        if std > 0.0 {
            let dist = Normal::new(0.0, std).ok()?;
            Some(Self {
                rng: ChaCha8Rng::seed_from_u64(seed),
                dist,
            })
        } else {
            None
        }
    }

    fn sample(&mut self) -> Complex64 {
        Complex64::new(self.dist.sample(&mut self.rng), self.dist.sample(&mut self.rng))
    }
}

/// Continuous-time drive model.
pub struct Drive {
    pub machine: Machine,
    pub mechanics: MechanicsPars,
    pub converter: Converter,
    /// Load torque profile [Nm]
    pub tau_l: Sequence,
}

impl Drive {
    pub fn initial_state(&self) -> PlantState {
        let (psi1, psi2) = self.machine.initial_flux();
        let (u_dc, i_l) = self.converter.initial_dc_state();
        let mut y = PlantState::zeros();
        y[PSI1_RE] = psi1.re;
        y[PSI1_IM] = psi1.im;
        y[PSI2_RE] = psi2.re;
        y[PSI2_IM] = psi2.im;
        y[U_DC] = u_dc;
        y[I_L] = i_l;
        y
    }

    /// State derivatives with the switching-state vector `q` held constant.
    pub fn f(&self, t: f64, y: &PlantState, q: Complex64) -> PlantState {
        let n_p = self.machine.n_p() as f64;
        let psi1 = Complex64::new(y[PSI1_RE], y[PSI1_IM]);
        let psi2 = Complex64::new(y[PSI2_RE], y[PSI2_IM]);

        let u_dc = self.converter.dc_voltage(y[U_DC]);
        let u_ss = Converter::ac_voltage(q, u_dc);

        let sample = self
            .machine
            .f(psi1, psi2, u_ss, n_p * y[W_M], n_p * y[THETA_M]);

        let i_dc = Converter::dc_current(q, sample.i_ss);
        let (d_u_dc, d_i_l) = self.converter.f(t, y[U_DC], y[I_L], i_dc);
        let (d_w_m, d_theta_m) = self
            .mechanics
            .f(y[W_M], sample.tau_m, self.tau_l.interp(t));

        let mut dy = PlantState::zeros();
        dy[PSI1_RE] = sample.d_psi1.re;
        dy[PSI1_IM] = sample.d_psi1.im;
        dy[PSI2_RE] = sample.d_psi2.re;
        dy[PSI2_IM] = sample.d_psi2.im;
        dy[W_M] = d_w_m;
        dy[THETA_M] = d_theta_m;
        dy[U_DC] = d_u_dc;
        dy[I_L] = d_i_l;
        dy
    }

    /// Sample the plant outputs at a control instant.
    pub fn measure(&self, y: &PlantState, noise: &mut Option<SensorNoise>) -> Measurement {
        let n_p = self.machine.n_p() as f64;
        let psi1 = Complex64::new(y[PSI1_RE], y[PSI1_IM]);
        let psi2 = Complex64::new(y[PSI2_RE], y[PSI2_IM]);
        let (mut i_ss, _) = self.machine.outputs(psi1, psi2, n_p * y[THETA_M]);
        if let Some(noise) = noise {
            i_ss += noise.sample();
        }
        Measurement {
            i_ss,
            u_dc: self.converter.dc_voltage(y[U_DC]),
            w_m: n_p * y[W_M],
            theta_m: wrap(n_p * y[THETA_M]),
        }
    }

    /// True electromagnetic torque, for logging.
    pub fn torque(&self, y: &PlantState) -> f64 {
        let n_p = self.machine.n_p() as f64;
        let psi1 = Complex64::new(y[PSI1_RE], y[PSI1_IM]);
        let psi2 = Complex64::new(y[PSI2_RE], y[PSI2_IM]);
        let (_, tau_m) = self.machine.outputs(psi1, psi2, n_p * y[THETA_M]);
        tau_m
    }
}

/// Plant with the converter input held over one sampling period, in the
/// shape the solver integrates.
pub struct HeldDrive<'a> {
    pub drive: &'a Drive,
    pub q: Complex64,
}

impl ode_solvers::System<f64, PlantState> for HeldDrive<'_> {
    fn system(&self, t: f64, y: &PlantState, dy: &mut PlantState) {
        *dy = self.drive.f(t, y, self.q);
    }
}
