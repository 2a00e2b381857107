use serde::{Deserialize, Serialize};

use super::{checked_exp, exp_convolution, finite};
use crate::error::ModelOverflow;

/// Physical constants of the two-compartment (blood ↔ CSF/GM) exchange model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiTeConstants {
    /// Transverse relaxation time of blood (ms)
    pub t2b: f64,
    /// Transverse relaxation time of the CSF/GM compartment (ms)
    pub t2csf: f64,
    /// Longitudinal relaxation time of arterial blood (ms)
    pub t1b: f64,
    /// Longitudinal relaxation time of the CSF/GM compartment (ms)
    pub t1csf: f64,
    /// Labeling efficiency
    pub alpha: f64,
}

impl Default for MultiTeConstants {
    fn default() -> Self {
        Self {
            t2b: 165.0,
            t2csf: 75.0,
            t1b: 1650.0,
            t1csf: 1400.0,
            alpha: 0.85,
        }
    }
}

/// Relaxation times of both compartments pooled with the exchange time.
///
/// Each pooled time combines the compartment's own relaxation time in parallel
/// with `t1blgm`, so `1 / t1bp = 1 / t1b + 1 / t1blgm` and likewise for the
/// other three.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Relaxation {
    pub t1blgm: f64,
    pub t1bp: f64,
    pub t1csfp: f64,
    pub t2bp: f64,
    pub t2csfp: f64,
}

impl Relaxation {
    pub fn new(t1blgm: f64, constants: &MultiTeConstants) -> Self {
        let pooled = |t: f64| 1.0 / ((1.0 / t) + (1.0 / t1blgm));
        Self {
            t1blgm,
            t1bp: pooled(constants.t1b),
            t1csfp: pooled(constants.t1csf),
            t2bp: pooled(constants.t2b),
            t2csfp: pooled(constants.t2csf),
        }
    }

    /// Rate at which blood magnetization moves into the CSF/GM compartment (1/ms)
    #[inline(always)]
    fn exchange_rate(&self) -> f64 {
        1.0 / self.t1blgm
    }
}

/// Blood and CSF/GM partial signals for one (label duration, delay, echo) triple.
///
/// The labelled bolus enters the blood compartment at a constant rate between
/// `att` and `att + tau`. Blood relaxes with `t1bp` while exchanging into the
/// CSF/GM compartment, which relaxes with `t1csfp`. During the echo time the
/// same hand-over continues with the transverse times `t2bp` and `t2csfp`.
///
/// Returns [`ModelOverflow`] if any intermediate value stops being finite.
#[allow(clippy::too_many_arguments)]
pub fn multi_te_sample(
    tau: f64,
    w: f64,
    te: f64,
    m0: f64,
    cbf: f64,
    att: f64,
    relaxation: &Relaxation,
    constants: &MultiTeConstants,
) -> Result<(f64, f64), ModelOverflow> {
    let t = tau + w;
    if t < att {
        return Ok((0.0, 0.0));
    }

    let k = relaxation.exchange_rate();
    let a = 1.0 / relaxation.t1bp;
    let c = 1.0 / relaxation.t1csfp;
    let input = finite(2.0 * constants.alpha * m0 * cbf * checked_exp(-att / constants.t1b)?)?;

    // Magnetization of both compartments `s` ms after bolus arrival, while the
    // bolus is still flowing in.
    let filling = |s: f64| -> Result<(f64, f64), ModelOverflow> {
        let blood = input * relaxation.t1bp * (1.0 - checked_exp(-a * s)?);
        let csf = k
            * input
            * relaxation.t1bp
            * ((1.0 - checked_exp(-c * s)?) * relaxation.t1csfp - exp_convolution(a, c, s)?);
        Ok((finite(blood)?, finite(csf)?))
    };

    let s = t - att;
    let (mb, mc) = if s < tau {
        filling(s)?
    } else {
        let (mb_end, mc_end) = filling(tau)?;
        let d = s - tau;
        let mb = mb_end * checked_exp(-a * d)?;
        let mc = mc_end * checked_exp(-c * d)? + k * mb_end * exp_convolution(a, c, d)?;
        (mb, mc)
    };

    let a2 = 1.0 / relaxation.t2bp;
    let c2 = 1.0 / relaxation.t2csfp;
    let sb = mb * checked_exp(-a2 * te)?;
    let scsf = mc * checked_exp(-c2 * te)? + k * mb * exp_convolution(a2, c2, te)?;

    Ok((finite(sb)?, finite(scsf)?))
}

/// Two-compartment multi-echo ASL signal, one value per (`tau[i]`, `w[i]`, `te[i]`).
///
/// `cbf` and `att` come from the single-compartment fit and are held fixed; the
/// free parameter is the exchange time `t1blgm` (ms).
///
/// A sample whose evaluation overflows is reported as zero signal. That keeps
/// the optimizer away from extreme exchange times rather than aborting the fit,
/// and is a modelling approximation.
#[allow(clippy::too_many_arguments)]
pub fn multi_te(
    tau: &[f64],
    w: &[f64],
    te: &[f64],
    m0: f64,
    cbf: f64,
    att: f64,
    t1blgm: f64,
    constants: &MultiTeConstants,
) -> Vec<f64> {
    debug_assert!(tau.len() == w.len() && w.len() == te.len());
    let relaxation = Relaxation::new(t1blgm, constants);

    tau.iter()
        .zip(w.iter())
        .zip(te.iter())
        .map(|((&tau, &w), &te)| {
            match multi_te_sample(tau, w, te, m0, cbf, att, &relaxation, constants) {
                Ok((sb, scsf)) => sb + scsf,
                Err(ModelOverflow) => 0.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut tau = Vec::new();
        let mut w = Vec::new();
        let mut te = Vec::new();
        for &pld in &[500.0, 1000.0, 1500.0, 2000.0] {
            for &echo in &[10.0, 30.0] {
                tau.push(3000.0);
                w.push(pld);
                te.push(echo);
            }
        }
        (tau, w, te)
    }

    #[test]
    fn pooled_times_combine_in_parallel() {
        let constants = MultiTeConstants::default();
        let r = Relaxation::new(400.0, &constants);
        assert_relative_eq!(1.0 / r.t1bp, 1.0 / 1650.0 + 1.0 / 400.0, max_relative = 1e-12);
        assert_relative_eq!(1.0 / r.t1csfp, 1.0 / 1400.0 + 1.0 / 400.0, max_relative = 1e-12);
        assert_relative_eq!(1.0 / r.t2bp, 1.0 / 165.0 + 1.0 / 400.0, max_relative = 1e-12);
        assert_relative_eq!(1.0 / r.t2csfp, 1.0 / 75.0 + 1.0 / 400.0, max_relative = 1e-12);
    }

    #[test]
    fn zero_before_bolus_arrival() {
        let constants = MultiTeConstants::default();
        let signal = multi_te(&[500.0], &[200.0], &[10.0], 1000.0, 0.01, 1200.0, 400.0, &constants);
        assert_eq!(signal, vec![0.0]);
    }

    #[test]
    fn overflow_yields_zero_not_nan() {
        let constants = MultiTeConstants::default();
        let (tau, w, te) = grid();

        // zero exchange time makes every pooled time collapse to zero
        let collapsed = multi_te(&tau, &w, &te, 1000.0, 0.01, 1200.0, 0.0, &constants);
        assert!(collapsed.iter().all(|s| s.is_finite()));

        // an M0 at the edge of f64 overflows the input amplitude
        let huge = multi_te(&tau, &w, &te, f64::MAX, 1.0, 0.0, 400.0, &constants);
        assert!(huge.iter().all(|&s| s == 0.0));

        let relaxation = Relaxation::new(0.0, &constants);
        let sample = multi_te_sample(3000.0, 500.0, 10.0, 1000.0, 0.01, 1200.0, &relaxation, &constants);
        assert_eq!(sample, Err(ModelOverflow));
    }

    #[test]
    fn later_echoes_carry_less_signal() {
        let constants = MultiTeConstants::default();
        let (tau, w, te) = grid();
        let signal = multi_te(&tau, &w, &te, 1000.0, 0.01, 1200.0, 400.0, &constants);
        for pair in signal.chunks(2) {
            assert!(pair[0] > 0.0);
            assert!(pair[1] < pair[0], "echo decay violated: {pair:?}");
        }
    }

    #[test]
    fn negligible_exchange_reduces_to_blood_relaxation() {
        let constants = MultiTeConstants::default();
        let (m0, cbf, att) = (1000.0, 0.01, 1200.0);
        let relaxation = Relaxation::new(1e12, &constants);
        let (sb, scsf) =
            multi_te_sample(3000.0, 500.0, 0.0, m0, cbf, att, &relaxation, &constants).unwrap();

        let input = 2.0 * 0.85 * m0 * cbf * (-att / 1650.0).exp();
        let expected = input * 1650.0 * (1.0 - (-(3500.0 - att) / 1650.0).exp());
        assert_relative_eq!(sb, expected, max_relative = 1e-6);
        assert!(scsf.abs() < 1e-6 * sb);
    }

    #[test]
    fn continuous_at_end_of_bolus() {
        let constants = MultiTeConstants::default();
        let relaxation = Relaxation::new(400.0, &constants);
        let (tau, att, eps) = (1800.0, 1200.0, 1e-6);
        let before =
            multi_te_sample(tau, att - eps, 20.0, 1000.0, 0.01, att, &relaxation, &constants).unwrap();
        let after =
            multi_te_sample(tau, att + eps, 20.0, 1000.0, 0.01, att, &relaxation, &constants).unwrap();
        assert_relative_eq!(before.0, after.0, max_relative = 1e-6);
        assert_relative_eq!(before.1, after.1, max_relative = 1e-6);
    }
}
