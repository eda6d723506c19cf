//! Rotational mechanics of the drive train.

use serde::{Deserialize, Serialize};

/// Stiff mechanical system parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MechanicsPars {
    /// Total moment of inertia [kgm²]
    pub j: f64,
    /// Viscous friction coefficient [Nms]
    pub b: f64,
}

impl Default for MechanicsPars {
    fn default() -> Self {
        Self { j: 0.015, b: 0.0 }
    }
}

impl MechanicsPars {
    /// Mechanical state derivatives `(d_w_m, d_theta_m)` for mechanical
    /// speed `w_m`, electromagnetic torque `tau_m`, and external load
    /// torque `tau_l`.
    pub fn f(&self, w_m: f64, tau_m: f64, tau_l: f64) -> (f64, f64) {
        let d_w_m = (tau_m - self.b * w_m - tau_l) / self.j;
        (d_w_m, w_m)
    }
}
