//! Bounded nonlinear least squares.
//!
//! [`fit`] minimizes `0.5 * Σ (model(p) - observed)²` subject to box bounds on
//! `p`. The default method is a projected Levenberg–Marquardt iteration; a
//! Nelder–Mead simplex (through `argmin`) is available as an alternative, and
//! its result is polished by Levenberg–Marquardt before it is accepted.

pub mod grid;
pub mod lm;
pub mod simplex;

use argmin::core::{CostFunction, Error, Jacobian, Operator};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

pub use grid::{linear_space, start_grid};
pub use lm::LevenbergMarquardt;

/// Square root of machine epsilon, relative step for forward differences.
const EPS_SQRT: f64 = 1.4901161193847656e-8;

/// Solver used by [`fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Method {
    #[default]
    LevenbergMarquardt,
    NelderMead,
}

/// Solver settings shared by both methods.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub method: Method,
    /// Iteration budget; exhausting it is a fit failure
    pub max_iterations: usize,
    /// Relative reduction of the cost below which the fit has converged
    pub ftol: f64,
    /// Relative parameter change below which the fit has converged
    pub xtol: f64,
    /// Initial Levenberg–Marquardt damping
    pub initial_damping: f64,
    /// Standard deviation of simplex costs below which Nelder–Mead stops
    pub simplex_tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            method: Method::LevenbergMarquardt,
            max_iterations: 1000,
            ftol: 1e-12,
            xtol: 1e-12,
            initial_damping: 1e-3,
            simplex_tolerance: 1e-10,
        }
    }
}

/// Box constraints `lower[i] <= p[i] <= upper[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, FitError> {
        if lower.len() != upper.len() {
            return Err(FitError::InvalidProblem {
                reason: format!(
                    "{} lower bounds but {} upper bounds",
                    lower.len(),
                    upper.len()
                ),
            });
        }
        for (i, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(FitError::InvalidProblem {
                    reason: format!("bounds of parameter {} are [{}, {}]", i, lo, hi),
                });
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Projects `x` onto the box.
    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&v, (&lo, &hi))| v.clamp(lo, hi))
            .collect()
    }

    /// Forward-difference step for parameter `i` at value `x` that stays inside the box.
    fn difference_step(&self, i: usize, x: f64) -> f64 {
        let (lo, hi) = (self.lower[i], self.upper[i]);
        let h = EPS_SQRT * x.abs().max(1.0);
        if x + h <= hi {
            h
        } else if x - h >= lo {
            -h
        } else if hi - x >= x - lo {
            hi - x
        } else {
            lo - x
        }
    }
}

/// Outcome of a converged fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Estimated parameters, always inside the bounds
    pub params: Vec<f64>,
    /// Final value of `0.5 * Σ r²`
    pub cost: f64,
    pub iterations: usize,
}

/// Curve-fitting problem: a model closure, the observations and the box.
///
/// Implements `argmin`'s [`Operator`] (residual vector), [`Jacobian`]
/// (forward differences) and [`CostFunction`] (half sum of squares on the
/// projected parameters) so either solver can drive it.
pub struct CurveFit<'a, F> {
    model: F,
    observed: &'a [f64],
    bounds: &'a Bounds,
}

impl<'a, F> CurveFit<'a, F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    pub fn new(model: F, observed: &'a [f64], bounds: &'a Bounds) -> Self {
        Self {
            model,
            observed,
            bounds,
        }
    }

    pub fn residuals(&self, params: &[f64]) -> Vec<f64> {
        (self.model)(params)
            .iter()
            .zip(self.observed.iter())
            .map(|(m, o)| m - o)
            .collect()
    }
}

impl<F> Operator for CurveFit<'_, F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, params: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.residuals(params))
    }
}

impl<F> Jacobian for CurveFit<'_, F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    type Param = Vec<f64>;
    type Jacobian = DMatrix<f64>;

    fn jacobian(&self, params: &Self::Param) -> Result<Self::Jacobian, Error> {
        let base = (self.model)(params.as_slice());
        let mut jac = DMatrix::zeros(base.len(), params.len());
        for i in 0..params.len() {
            let h = self.bounds.difference_step(i, params[i]);
            if h == 0.0 {
                continue;
            }
            let mut shifted = params.clone();
            shifted[i] += h;
            let moved = (self.model)(shifted.as_slice());
            for (k, (m, b)) in moved.iter().zip(base.iter()).enumerate() {
                jac[(k, i)] = (m - b) / h;
            }
        }
        Ok(jac)
    }
}

impl<F> CostFunction for CurveFit<'_, F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, Error> {
        let projected = self.bounds.clamp(params);
        let cost = 0.5 * self.residuals(&projected).iter().map(|r| r * r).sum::<f64>();
        // NaN would stall the simplex ordering
        Ok(if cost.is_finite() { cost } else { f64::INFINITY })
    }
}

/// Fits `model` to `observed` starting from `initial`, within `bounds`.
///
/// Deterministic for identical inputs. On success the parameters are inside
/// the bounds; failure to converge is reported as a [`FitError`], never as the
/// initial guess.
pub fn fit<F>(
    model: F,
    observed: &[f64],
    initial: &[f64],
    bounds: &Bounds,
    options: &FitOptions,
) -> Result<FitResult, FitError>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    if initial.len() != bounds.len() || bounds.is_empty() {
        return Err(FitError::InvalidProblem {
            reason: format!(
                "{} initial values for {} bounded parameters",
                initial.len(),
                bounds.len()
            ),
        });
    }
    if observed.is_empty() {
        return Err(FitError::InvalidProblem {
            reason: "no observations".to_string(),
        });
    }

    match options.method {
        Method::LevenbergMarquardt => LevenbergMarquardt::from(options).minimize(
            &CurveFit::new(model, observed, bounds),
            initial,
            bounds,
        ),
        Method::NelderMead => {
            // the simplex stops once its vertex costs agree, which also happens
            // when two vertices straddle the minimum
            let coarse = simplex::minimize(
                CurveFit::new(&model, observed, bounds),
                initial,
                bounds,
                options,
            )?;
            let polished = LevenbergMarquardt::from(options).minimize(
                &CurveFit::new(&model, observed, bounds),
                &coarse.params,
                bounds,
            )?;
            Ok(FitResult {
                iterations: coarse.iterations + polished.iterations,
                ..polished
            })
        }
    }
}

/// Runs [`fit`] from every point in `starts`, in order, and keeps the
/// converged result with the lowest cost (the earliest one on ties).
///
/// Piecewise signal models have kinks where a sample changes regime, and a
/// single start can settle in the local minimum next to one. If no start
/// converges, the error of the first start is returned.
pub fn fit_multistart<F>(
    model: F,
    observed: &[f64],
    starts: &[Vec<f64>],
    bounds: &Bounds,
    options: &FitOptions,
) -> Result<FitResult, FitError>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let mut best: Option<FitResult> = None;
    let mut first_error = None;

    for start in starts {
        match fit(&model, observed, start, bounds, options) {
            Ok(result) => {
                let exact = result.cost == 0.0;
                if best.as_ref().map_or(true, |b| result.cost < b.cost) {
                    best = Some(result);
                }
                if exact {
                    break;
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    best.ok_or_else(|| {
        first_error.unwrap_or(FitError::InvalidProblem {
            reason: "no starting points".to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn multistart_keeps_lowest_cost() {
        // exact root at p = -2, local minimum of the squared residual near p = 1.43
        let model = |p: &[f64]| vec![(p[0] + 2.0) * ((p[0] - 1.5).powi(2) + 0.5)];
        let bounds = Bounds::new(vec![-3.0], vec![3.0]).unwrap();
        let result = fit_multistart(
            model,
            &[0.0],
            &[vec![2.5], vec![-2.8]],
            &bounds,
            &FitOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(result.params[0], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn multistart_without_starts_is_invalid() {
        let bounds = Bounds::new(vec![0.0], vec![1.0]).unwrap();
        let err = fit_multistart(|p: &[f64]| vec![p[0]], &[0.5], &[], &bounds, &FitOptions::default());
        assert!(matches!(err, Err(FitError::InvalidProblem { .. })));
    }

    fn exponential(t: &[f64]) -> impl Fn(&[f64]) -> Vec<f64> + '_ {
        move |p: &[f64]| t.iter().map(|&t| p[0] * (-t / p[1]).exp()).collect()
    }

    #[test]
    fn bounds_reject_inverted_interval() {
        assert!(Bounds::new(vec![1.0], vec![0.0]).is_err());
        assert!(Bounds::new(vec![0.0, 0.0], vec![1.0]).is_err());
        assert!(Bounds::new(vec![0.0], vec![0.0]).is_ok());
    }

    #[test]
    fn difference_step_stays_inside_bounds() {
        let bounds = Bounds::new(vec![0.0], vec![1.0]).unwrap();
        assert!(bounds.difference_step(0, 0.0) > 0.0);
        assert!(bounds.difference_step(0, 1.0) < 0.0);
        let point = Bounds::new(vec![2.0], vec![2.0]).unwrap();
        assert_eq!(point.difference_step(0, 2.0), 0.0);
    }

    #[test]
    fn recovers_exponential_decay() {
        let t: Vec<f64> = (0..12).map(|i| 10.0 * i as f64).collect();
        let truth = [250.0, 35.0];
        let observed = exponential(&t)(&truth);
        let bounds = Bounds::new(vec![0.0, 1.0], vec![1000.0, 500.0]).unwrap();

        let result = fit(
            exponential(&t),
            &observed,
            &[100.0, 100.0],
            &bounds,
            &FitOptions::default(),
        )
        .unwrap();

        assert_relative_eq!(result.params[0], truth[0], max_relative = 1e-6);
        assert_relative_eq!(result.params[1], truth[1], max_relative = 1e-6);
    }

    #[test]
    fn respects_active_bound() {
        // data generated with a decay time outside the allowed box
        let t: Vec<f64> = (0..12).map(|i| 10.0 * i as f64).collect();
        let observed = exponential(&t)(&[250.0, 80.0]);
        let bounds = Bounds::new(vec![0.0, 1.0], vec![1000.0, 50.0]).unwrap();

        let result = fit(
            exponential(&t),
            &observed,
            &[100.0, 20.0],
            &bounds,
            &FitOptions::default(),
        )
        .unwrap();

        assert!(result.params[1] <= 50.0);
        assert!(result.params[0] >= 0.0 && result.params[0] <= 1000.0);
        assert_relative_eq!(result.params[1], 50.0, max_relative = 1e-6);
    }

    #[test]
    fn rejects_mismatched_initial_guess() {
        let bounds = Bounds::new(vec![0.0], vec![1.0]).unwrap();
        let err = fit(|p: &[f64]| vec![p[0]], &[0.5], &[0.1, 0.2], &bounds, &FitOptions::default());
        assert!(matches!(err, Err(FitError::InvalidProblem { .. })));
    }

    #[test]
    fn nelder_mead_recovers_single_parameter() {
        let t: Vec<f64> = (1..10).map(|i| i as f64).collect();
        let line = |p: &[f64]| t.iter().map(|&t| p[0] * t).collect::<Vec<_>>();
        let observed = line(&[3.5]);
        let bounds = Bounds::new(vec![0.0], vec![10.0]).unwrap();
        let options = FitOptions {
            method: Method::NelderMead,
            max_iterations: 2000,
            ..FitOptions::default()
        };

        let result = fit(line, &observed, &[1.0], &bounds, &options).unwrap();
        assert_relative_eq!(result.params[0], 3.5, max_relative = 1e-9);
        assert!(result.cost < 1e-12);
    }

    #[test]
    fn simplex_straddling_the_minimum_is_not_the_answer() {
        // from 1.0 the simplex stops with vertices at 3.45 and 3.55
        let t: Vec<f64> = (1..10).map(|i| i as f64).collect();
        let line = |p: &[f64]| t.iter().map(|&t| p[0] * t).collect::<Vec<_>>();
        let observed = line(&[3.5]);
        let bounds = Bounds::new(vec![0.0], vec![10.0]).unwrap();
        let options = FitOptions {
            method: Method::NelderMead,
            ..FitOptions::default()
        };

        let coarse = simplex::minimize(
            CurveFit::new(&line, &observed, &bounds),
            &[1.0],
            &bounds,
            &options,
        )
        .unwrap();
        assert!((coarse.params[0] - 3.5).abs() > 1e-3);

        let result = fit(&line, &observed, &[1.0], &bounds, &options).unwrap();
        assert_relative_eq!(result.params[0], 3.5, max_relative = 1e-9);
    }

    #[test]
    fn nelder_mead_recovers_exponential_decay() {
        let t: Vec<f64> = (0..12).map(|i| 10.0 * i as f64).collect();
        let truth = [250.0, 35.0];
        let observed = exponential(&t)(&truth);
        let bounds = Bounds::new(vec![0.0, 1.0], vec![1000.0, 500.0]).unwrap();
        let options = FitOptions {
            method: Method::NelderMead,
            ..FitOptions::default()
        };

        let result = fit(exponential(&t), &observed, &[100.0, 100.0], &bounds, &options).unwrap();
        assert_relative_eq!(result.params[0], truth[0], max_relative = 1e-6);
        assert_relative_eq!(result.params[1], truth[1], max_relative = 1e-6);
    }
}
