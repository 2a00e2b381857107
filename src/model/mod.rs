//! Analytical ASL signal models.
//!
//! Both models are pure functions of the acquisition timing, the voxel's M0 and
//! the perfusion parameters. Every per-voxel quantity is an explicit argument so
//! that a fit closure built on top of them has no hidden state.

pub mod buxton;
pub mod multi_te;

pub use buxton::{buxton, BuxtonConstants};
pub use multi_te::{multi_te, multi_te_sample, MultiTeConstants, Relaxation};

use crate::error::ModelOverflow;

/// Largest argument accepted by [`checked_exp`] before the result overflows `f64`.
pub(crate) const EXP_ARG_MAX: f64 = 709.78;

/// `exp(x)` that reports overflow instead of returning `inf`.
#[inline(always)]
pub(crate) fn checked_exp(x: f64) -> Result<f64, ModelOverflow> {
    if x.is_nan() || x > EXP_ARG_MAX {
        return Err(ModelOverflow);
    }
    Ok(x.exp())
}

/// Turns NaN/inf into [`ModelOverflow`].
#[inline(always)]
pub(crate) fn finite(x: f64) -> Result<f64, ModelOverflow> {
    if x.is_finite() {
        Ok(x)
    } else {
        Err(ModelOverflow)
    }
}

/// `(exp(-a t) - exp(-c t)) / (c - a)`, continuous through `a == c`.
///
/// This is the convolution of two exponential decays and appears whenever
/// magnetization is handed from one compartment to another.
pub(crate) fn exp_convolution(a: f64, c: f64, t: f64) -> Result<f64, ModelOverflow> {
    let ea = checked_exp(-a * t)?;
    let diff = c - a;
    if diff.abs() <= 1e-12 * a.abs().max(c.abs()) {
        return finite(t * ea);
    }
    let ec = checked_exp(-c * t)?;
    finite((ea - ec) / diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn checked_exp_rejects_large_arguments() {
        assert_eq!(checked_exp(800.0), Err(ModelOverflow));
        assert_eq!(checked_exp(f64::NAN), Err(ModelOverflow));
        assert_relative_eq!(checked_exp(1.0).unwrap(), std::f64::consts::E);
    }

    #[test]
    fn exp_convolution_is_continuous_at_equal_rates() {
        let t = 30.0;
        let a = 1.0 / 50.0;
        let limit = exp_convolution(a, a, t).unwrap();
        let near = exp_convolution(a, a * (1.0 + 1e-7), t).unwrap();
        assert_relative_eq!(limit, near, max_relative = 1e-5);
        assert_relative_eq!(limit, t * (-a * t).exp(), max_relative = 1e-12);
    }
}
