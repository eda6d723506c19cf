//! Reference generation: time profiles, lookup tables, and optimal
//! current-vector references.
//!
//! The MTPA and MTPV loci are computed once from the machine's steady-state
//! torque and voltage-limit equations over a current-magnitude sweep and then
//! treated as read-only tables during simulation.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::machine::{InductionMachinePars, SynchronousMachinePars};

/// Piecewise-linear function of time.
///
/// Duplicate breakpoints express steps. Queries outside the covered span
/// clamp to the end values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl Sequence {
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Self {
        assert_eq!(times.len(), values.len(), "breakpoint count mismatch");
        Self { times, values }
    }

    pub fn constant(value: f64) -> Self {
        Self {
            times: vec![0.0],
            values: vec![value],
        }
    }

    pub fn interp(&self, t: f64) -> f64 {
        let (ts, vs) = (&self.times, &self.values);
        if ts.is_empty() {
            return 0.0;
        }
        if t <= ts[0] {
            return vs[0];
        }
        let last = ts.len() - 1;
        if t >= ts[last] {
            return vs[last];
        }
        for i in 0..last {
            if t < ts[i + 1] {
                let dt = ts[i + 1] - ts[i];
                if dt <= 0.0 {
                    return vs[i + 1];
                }
                let w = (t - ts[i]) / dt;
                return vs[i] + w * (vs[i + 1] - vs[i]);
            }
        }
        vs[last]
    }
}

/// Monotonic one-dimensional lookup table with linear interpolation and
/// end-value clamping.
#[derive(Debug, Clone)]
pub struct Lut {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Lut {
    /// Build from sample pairs; the pairs are sorted by `x`.
    pub fn from_pairs(mut pairs: Vec<(f64, f64)>) -> Self {
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (x, y) = pairs.into_iter().unzip();
        Self { x, y }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn min_x(&self) -> f64 {
        self.x.first().copied().unwrap_or(0.0)
    }

    pub fn max_x(&self) -> f64 {
        self.x.last().copied().unwrap_or(0.0)
    }

    pub fn interp(&self, x: f64) -> f64 {
        let n = self.x.len();
        if n == 0 {
            return 0.0;
        }
        if x <= self.x[0] {
            return self.y[0];
        }
        if x >= self.x[n - 1] {
            return self.y[n - 1];
        }
        for i in 0..n - 1 {
            if x < self.x[i + 1] {
                let dx = self.x[i + 1] - self.x[i];
                if dx <= 0.0 {
                    return self.y[i + 1];
                }
                let w = (x - self.x[i]) / dx;
                return self.y[i] + w * (self.y[i + 1] - self.y[i]);
            }
        }
        self.y[n - 1]
    }
}

/// MTPA and MTPV torque characteristics of a synchronous machine.
///
/// Magnetic saturation is omitted; the loci follow the classic current-vector
/// control formulation for salient machines.
#[derive(Debug, Clone, Copy)]
pub struct TorqueCharacteristics {
    par: SynchronousMachinePars,
}

impl TorqueCharacteristics {
    pub fn new(par: SynchronousMachinePars) -> Self {
        Self { par }
    }

    /// Stator current as a function of the stator flux linkage.
    pub fn current(&self, psi_s: Complex64) -> Complex64 {
        let par = &self.par;
        Complex64::new((psi_s.re - par.psi_f) / par.l_d, psi_s.im / par.l_q)
    }

    /// Stator flux linkage as a function of the stator current.
    pub fn flux(&self, i_s: Complex64) -> Complex64 {
        let par = &self.par;
        Complex64::new(par.l_d * i_s.re + par.psi_f, par.l_q * i_s.im)
    }

    /// Electromagnetic torque as a function of the stator flux linkage.
    pub fn torque(&self, psi_s: Complex64) -> f64 {
        let i_s = self.current(psi_s);
        1.5 * self.par.n_p as f64 * (i_s * psi_s.conj()).im
    }

    /// MTPA angle of the stator current vector for a current magnitude.
    pub fn mtpa(&self, abs_i_s: f64) -> f64 {
        let par = &self.par;
        let abs_i_s = if abs_i_s > 0.0 { abs_i_s } else { f64::EPSILON };
        if par.psi_f == 0.0 {
            // SyRM, d-axis aligned with the maximum inductance
            0.25 * PI
        } else if par.l_d == par.l_q {
            // Nonsalient machine
            0.5 * PI
        } else {
            let a = par.psi_f / ((par.l_q - par.l_d) * abs_i_s);
            if par.l_q > par.l_d {
                (0.25 * (a - (a * a + 8.0).sqrt())).acos()
            } else {
                (0.25 * (a + (a * a + 8.0).sqrt())).acos()
            }
        }
    }

    /// MTPV stator current at the given current magnitude, i.e. the
    /// intersection of the MTPV locus and the current circle. `None` when no
    /// MTPV point exists for the magnitude.
    pub fn mtpv_current(&self, abs_i_s: f64) -> Option<Complex64> {
        let par = &self.par;
        if par.psi_f == 0.0 {
            let angle = (par.l_d / par.l_q).atan();
            return Some(Complex64::from_polar(abs_i_s, angle));
        }
        if par.psi_f / par.l_d >= abs_i_s {
            return None;
        }
        if par.l_d == par.l_q {
            let i_sd = -par.psi_f / par.l_d;
            let i_sq = (abs_i_s * abs_i_s - i_sd * i_sd).max(0.0).sqrt();
            return Some(Complex64::new(i_sd, i_sq));
        }
        let k = par.l_q / (par.l_d - par.l_q);
        let a = par.l_d * par.l_d + par.l_q * par.l_q;
        let b = (2.0 + k) * par.psi_f * par.l_d;
        let c = (1.0 + k) * par.psi_f * par.psi_f - (par.l_q * abs_i_s).powi(2);
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return None;
        }
        let i_sd = if par.l_q > par.l_d {
            0.5 * (-b - disc.sqrt()) / a
        } else {
            0.5 * (-b + disc.sqrt()) / a
        };
        let i_sq = (abs_i_s * abs_i_s - i_sd * i_sd).max(0.0).sqrt();
        Some(Complex64::new(i_sd, i_sq))
    }

    /// MTPA locus over a current-magnitude sweep as a lookup table from
    /// torque to d-axis current.
    pub fn mtpa_locus(&self, max_i_s: f64, n: usize) -> Lut {
        let n = n.max(2);
        let mut pairs = Vec::with_capacity(n);
        for k in 0..n {
            let abs_i_s = max_i_s * k as f64 / (n - 1) as f64;
            let beta = self.mtpa(abs_i_s);
            let i_s = Complex64::from_polar(abs_i_s.max(f64::EPSILON), beta);
            let tau_m = self.torque(self.flux(i_s));
            pairs.push((tau_m, i_s.re));
        }
        Lut::from_pairs(pairs)
    }

    /// MTPV locus over a current-magnitude sweep as a lookup table from
    /// d-axis current to the q-axis current bound. `None` when the locus
    /// does not intersect the swept current range.
    pub fn mtpv_locus(&self, max_i_s: f64, n: usize) -> Option<Lut> {
        let n = n.max(2);
        let mut pairs = Vec::new();
        for k in 0..n {
            let abs_i_s = max_i_s * k as f64 / (n - 1) as f64;
            if let Some(i_s) = self.mtpv_current(abs_i_s) {
                if i_s.re.is_finite() && i_s.im.is_finite() {
                    pairs.push((i_s.re, i_s.im));
                }
            }
        }
        if pairs.len() < 2 {
            None
        } else {
            Some(Lut::from_pairs(pairs))
        }
    }
}

/// Configuration of the synchronous-machine current reference generator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmCurrentRefCfg {
    /// Current limit [A]
    pub i_max: f64,
    /// Field-weakening bandwidth [rad/s]
    pub alpha_fw: f64,
    /// Nominal speed used to scale the field-weakening gain [rad/s]
    pub w_nom: f64,
}

/// Current reference generator for synchronous machines.
///
/// Maps the torque command to a current vector through the MTPA table,
/// limits the q-axis current against the current circle and the MTPV bound,
/// and drives the d-axis reference with a field-weakening integrator on the
/// voltage headroom.
#[derive(Debug, Clone)]
pub struct SmCurrentReference {
    par: SynchronousMachinePars,
    i_max: f64,
    k_fw: f64,
    i_sd_mtpa: Lut,
    i_sq_mtpv: Option<Lut>,
    i_sd_ref: f64,
}

impl SmCurrentReference {
    pub fn new(par: SynchronousMachinePars, cfg: &SmCurrentRefCfg) -> Self {
        let characteristics = TorqueCharacteristics::new(par);
        // Sweep beyond the current limit so the tables cover the whole
        // reachable torque range.
        let i_sd_mtpa = characteristics.mtpa_locus(2.0 * cfg.i_max, 50);
        let i_sq_mtpv = characteristics.mtpv_locus(2.0 * cfg.i_max, 50);
        Self {
            par,
            i_max: cfg.i_max,
            k_fw: cfg.alpha_fw / (cfg.w_nom * par.l_d),
            i_sd_mtpa,
            i_sq_mtpv,
            i_sd_ref: 0.0,
        }
    }

    fn q_axis_current_limit(&self, i_sd: f64) -> f64 {
        let i_sq_circle = (self.i_max * self.i_max - i_sd * i_sd).max(0.0).sqrt();
        match &self.i_sq_mtpv {
            Some(lut) if i_sd <= lut.max_x() => i_sq_circle.min(lut.interp(i_sd)),
            _ => i_sq_circle,
        }
    }

    /// Current reference and the torque it realizes for a torque command.
    pub fn output(&self, tau_m_ref: f64) -> (Complex64, f64) {
        let par = &self.par;
        let psi_t = par.psi_f + (par.l_d - par.l_q) * self.i_sd_ref;
        let mut i_sq_ref = if psi_t != 0.0 {
            tau_m_ref / (1.5 * par.n_p as f64 * psi_t)
        } else {
            0.0
        };
        let i_sq_max = self.q_axis_current_limit(self.i_sd_ref);
        if i_sq_ref.abs() > i_sq_max {
            i_sq_ref = i_sq_ref.signum() * i_sq_max;
        }
        let tau_m_lim = 1.5 * par.n_p as f64 * psi_t * i_sq_ref;
        (Complex64::new(self.i_sd_ref, i_sq_ref), tau_m_lim)
    }

    /// Integrate the field-weakening state from the voltage headroom and
    /// re-apply the MTPA and current limits.
    pub fn update(&mut self, t_s: f64, tau_m_lim: f64, u_s_ref: Complex64, u_dc: f64) {
        let u_s_max = u_dc / 3.0_f64.sqrt();
        self.i_sd_ref += t_s * self.k_fw * (u_s_max - u_s_ref.norm());
        let i_sd_mtpa = self.i_sd_mtpa.interp(tau_m_lim.abs());
        if self.i_sd_ref > i_sd_mtpa {
            self.i_sd_ref = i_sd_mtpa;
        }
        if self.i_sd_ref < -self.i_max {
            self.i_sd_ref = -self.i_max;
        }
    }
}

/// Configuration of the induction-machine current reference generator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImCurrentRefCfg {
    /// Current limit [A]
    pub i_max: f64,
    /// Field-weakening bandwidth [rad/s]
    pub alpha_fw: f64,
    /// Nominal speed used to scale the field-weakening gain [rad/s]
    pub w_nom: f64,
    /// Nominal rotor flux [Vs]
    pub psi_r_nom: f64,
}

/// Current reference generator for induction machines in rotor flux
/// coordinates: nominal flux-producing d-axis current with field weakening,
/// torque-producing q-axis current limited by the current circle.
#[derive(Debug, Clone)]
pub struct ImCurrentReference {
    n_p: u32,
    i_max: f64,
    k_fw: f64,
    i_sd_nom: f64,
    i_sd_min: f64,
    i_sd_ref: f64,
}

impl ImCurrentReference {
    pub fn new(par: InductionMachinePars, cfg: &ImCurrentRefCfg) -> Self {
        let i_sd_nom = cfg.psi_r_nom / par.l_m;
        Self {
            n_p: par.n_p,
            i_max: cfg.i_max,
            k_fw: cfg.alpha_fw / (cfg.w_nom * par.l_m),
            i_sd_nom,
            // Keep a flux floor so the machine never fully demagnetizes.
            i_sd_min: 0.1 * i_sd_nom,
            i_sd_ref: i_sd_nom,
        }
    }

    /// Current reference and realized torque for a torque command and the
    /// estimated rotor flux magnitude.
    pub fn output(&self, tau_m_ref: f64, psi_r: f64) -> (Complex64, f64) {
        let k_t = 1.5 * self.n_p as f64 * psi_r;
        let mut i_sq_ref = if psi_r > 0.0 { tau_m_ref / k_t } else { 0.0 };
        let i_sq_max = (self.i_max * self.i_max - self.i_sd_ref * self.i_sd_ref)
            .max(0.0)
            .sqrt();
        if i_sq_ref.abs() > i_sq_max {
            i_sq_ref = i_sq_ref.signum() * i_sq_max;
        }
        let tau_m_lim = k_t * i_sq_ref;
        (Complex64::new(self.i_sd_ref, i_sq_ref), tau_m_lim)
    }

    /// Integrate the field-weakening state from the voltage headroom.
    pub fn update(&mut self, t_s: f64, u_s_ref: Complex64, u_dc: f64) {
        let u_s_max = u_dc / 3.0_f64.sqrt();
        self.i_sd_ref += t_s * self.k_fw * (u_s_max - u_s_ref.norm());
        self.i_sd_ref = self.i_sd_ref.clamp(self.i_sd_min, self.i_sd_nom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_interpolates_and_steps() {
        let seq = Sequence::new(
            vec![0.0, 1.0, 1.0, 2.0],
            vec![0.0, 0.0, 10.0, 10.0],
        );
        assert_eq!(seq.interp(-1.0), 0.0);
        assert_eq!(seq.interp(0.5), 0.0);
        // Step at t = 1.0
        assert_eq!(seq.interp(1.0), 10.0);
        assert_eq!(seq.interp(3.0), 10.0);

        let ramp = Sequence::new(vec![0.0, 2.0], vec![0.0, 4.0]);
        assert!((ramp.interp(0.5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lut_clamps_outside_range() {
        let lut = Lut::from_pairs(vec![(1.0, 10.0), (0.0, 0.0), (2.0, 20.0)]);
        assert_eq!(lut.interp(-1.0), 0.0);
        assert_eq!(lut.interp(3.0), 20.0);
        assert!((lut.interp(1.5) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn mtpa_table_is_monotonic_in_torque() {
        let par = SynchronousMachinePars::default();
        let characteristics = TorqueCharacteristics::new(par);
        let lut = characteristics.mtpa_locus(20.0, 30);
        // d-axis current moves monotonically negative as torque grows
        // (salient machine with l_q > l_d).
        let mut prev = lut.interp(0.0);
        for k in 1..20 {
            let i_sd = lut.interp(k as f64 * 2.0);
            assert!(i_sd <= prev + 1e-9);
            prev = i_sd;
        }
    }

    #[test]
    fn degenerate_sweep_counts_still_produce_a_table() {
        let par = SynchronousMachinePars::default();
        let characteristics = TorqueCharacteristics::new(par);
        for n in [0, 1] {
            let lut = characteristics.mtpa_locus(20.0, n);
            assert!(!lut.is_empty());
            assert!(lut.interp(5.0).is_finite());
        }
    }

    #[test]
    fn default_machine_has_no_mtpv_within_current_limit() {
        // psi_f / l_d exceeds the swept range for the 2.2-kW machine.
        let par = SynchronousMachinePars::default();
        let characteristics = TorqueCharacteristics::new(par);
        assert!(characteristics.mtpv_current(10.0).is_none());
    }

    #[test]
    fn mtpv_bound_limits_q_axis_current() {
        // Low-flux machine where MTPV appears inside the current range.
        let par = SynchronousMachinePars {
            psi_f: 0.1,
            ..SynchronousMachinePars::default()
        };
        let characteristics = TorqueCharacteristics::new(par);
        let i_mtpv = characteristics
            .mtpv_current(10.0)
            .expect("MTPV must exist for low-flux machine");
        assert!(i_mtpv.re < 0.0);
        assert!(i_mtpv.im > 0.0);
        assert!((i_mtpv.norm() - 10.0).abs() < 1e-9);

        let cfg = SmCurrentRefCfg {
            i_max: 10.0,
            alpha_fw: 2.0 * PI * 20.0,
            w_nom: 2.0 * PI * 75.0,
        };
        let current_ref = SmCurrentReference::new(par, &cfg);
        assert!(current_ref.i_sq_mtpv.is_some());
    }

    #[test]
    fn sm_reference_respects_current_limit() {
        let par = SynchronousMachinePars::default();
        let cfg = SmCurrentRefCfg {
            i_max: 9.0,
            alpha_fw: 2.0 * PI * 20.0,
            w_nom: 2.0 * PI * 75.0,
        };
        let current_ref = SmCurrentReference::new(par, &cfg);
        let (i_s_ref, tau_m_lim) = current_ref.output(1000.0);
        assert!(i_s_ref.norm() <= cfg.i_max + 1e-9);
        assert!(tau_m_lim < 1000.0);
    }

    #[test]
    fn im_reference_guards_zero_flux() {
        let par = InductionMachinePars::default();
        let cfg = ImCurrentRefCfg {
            i_max: 10.0,
            alpha_fw: 2.0 * PI * 20.0,
            w_nom: 2.0 * PI * 50.0,
            psi_r_nom: 0.9,
        };
        let current_ref = ImCurrentReference::new(par, &cfg);
        let (i_s_ref, tau_m_lim) = current_ref.output(10.0, 0.0);
        assert_eq!(i_s_ref.im, 0.0);
        assert_eq!(tau_m_lim, 0.0);
        // Flux-producing current stays at its nominal value.
        assert!((i_s_ref.re - 0.9 / par.l_m).abs() < 1e-12);
    }

    #[test]
    fn field_weakening_pulls_d_axis_down_when_voltage_saturates() {
        let par = SynchronousMachinePars::default();
        let cfg = SmCurrentRefCfg {
            i_max: 9.0,
            alpha_fw: 2.0 * PI * 20.0,
            w_nom: 2.0 * PI * 75.0,
        };
        let mut current_ref = SmCurrentReference::new(par, &cfg);
        // Voltage reference far above the available bus voltage.
        for _ in 0..200 {
            current_ref.update(250e-6, 5.0, Complex64::new(500.0, 0.0), 540.0);
        }
        assert!(current_ref.i_sd_ref < 0.0);
        assert!(current_ref.i_sd_ref >= -cfg.i_max);
    }
}
