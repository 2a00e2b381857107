use serde::{Deserialize, Serialize};

/// Physical constants of the single-compartment kinetic model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuxtonConstants {
    /// Blood-water partition coefficient
    pub lambda: f64,
    /// Longitudinal relaxation time of arterial blood (ms)
    pub t1b: f64,
    /// Labeling efficiency
    pub alpha: f64,
}

impl Default for BuxtonConstants {
    fn default() -> Self {
        Self {
            lambda: 0.98,
            t1b: 1650.0,
            alpha: 0.85,
        }
    }
}

/// Buxton single-compartment ASL signal, one value per (`tau[i]`, `w[i]`) pair.
///
/// # Arguments
/// - `tau`: label durations (ms)
/// - `w`: post-label delays (ms), paired by index with `tau`
/// - `m0`: equilibrium magnetization of the voxel
/// - `cbf`: flow in per-ms fractional units (unscaled)
/// - `att`: arterial transit time (ms)
///
/// Returns zero for every sample acquired before the bolus reaches the voxel.
pub fn buxton(
    tau: &[f64],
    w: &[f64],
    m0: f64,
    cbf: f64,
    att: f64,
    constants: &BuxtonConstants,
) -> Vec<f64> {
    debug_assert_eq!(tau.len(), w.len());
    let BuxtonConstants { lambda, t1b, alpha } = *constants;

    let t1bp = 1.0 / ((1.0 / t1b) + (cbf / lambda));
    let amplitude = 2.0 * m0 * cbf * t1bp * alpha * (-att / t1b).exp();

    tau.iter()
        .zip(w.iter())
        .map(|(&tau, &w)| {
            let t = tau + w;
            if t < att {
                0.0
            } else if t < tau + att {
                amplitude * (1.0 - (-(t - att) / t1bp).exp())
            } else {
                amplitude * (1.0 - (-tau / t1bp).exp()) * (-(t - tau - att) / t1bp).exp()
            }
        })
        .collect()
}
