use argmin::core::{Jacobian, Operator};
use nalgebra::{DMatrix, DVector};

use super::{Bounds, FitOptions, FitResult};
use crate::error::FitError;

const DAMPING_MIN: f64 = 1e-15;
const DAMPING_MAX: f64 = 1e16;
/// Largest scaled gradient `|gᵢ| / (‖Jᵢ‖·‖r‖)` accepted at a stalled point.
const GTOL: f64 = 1e-6;
/// Lower limit on a diagonal entry of JᵀJ when scaling the damping term.
const DIAGONAL_FLOOR: f64 = 1e-300;

/// Projected Levenberg–Marquardt for box-constrained least squares.
///
/// Every trial point is projected onto the bounds. Parameters sitting on a
/// bound whose gradient points outward are frozen for that step, so the
/// remaining ones are solved as an unconstrained subproblem.
#[derive(Debug, Clone, Copy)]
pub struct LevenbergMarquardt {
    max_iterations: usize,
    ftol: f64,
    xtol: f64,
    initial_damping: f64,
}

impl From<&FitOptions> for LevenbergMarquardt {
    fn from(options: &FitOptions) -> Self {
        Self {
            max_iterations: options.max_iterations,
            ftol: options.ftol,
            xtol: options.xtol,
            initial_damping: options.initial_damping,
        }
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::from(&FitOptions::default())
    }
}

impl LevenbergMarquardt {
    pub fn minimize<P>(
        &self,
        problem: &P,
        initial: &[f64],
        bounds: &Bounds,
    ) -> Result<FitResult, FitError>
    where
        P: Operator<Param = Vec<f64>, Output = Vec<f64>>
            + Jacobian<Param = Vec<f64>, Jacobian = DMatrix<f64>>,
    {
        let mut x = bounds.clamp(initial);
        let mut r = residuals(problem, &x)?;
        let mut cost = half_norm_squared(&r);
        let mut damping = self.initial_damping;

        for iteration in 1..=self.max_iterations {
            if cost == 0.0 {
                return Ok(FitResult {
                    params: x,
                    cost,
                    iterations: iteration - 1,
                });
            }

            let jac = problem
                .jacobian(&x)
                .map_err(|e| FitError::Solver(e.to_string()))?;
            if jac.iter().any(|v| !v.is_finite()) {
                return Err(FitError::NonFinite { params: x });
            }
            let jt = jac.transpose();
            let jtj = &jt * &jac;
            let gradient = &jt * DVector::from_column_slice(&r);

            let active = active_set(&x, &gradient, bounds);
            if gradient
                .iter()
                .zip(active.iter())
                .all(|(g, &pinned)| pinned || *g == 0.0)
            {
                return Ok(FitResult {
                    params: x,
                    cost,
                    iterations: iteration,
                });
            }

            loop {
                let step = match solve_damped(&jtj, &gradient, &active, damping) {
                    Some(step) => step,
                    None => {
                        damping *= 10.0;
                        if damping > DAMPING_MAX {
                            return Err(FitError::NotConverged {
                                iterations: iteration,
                            });
                        }
                        continue;
                    }
                };

                let moved: Vec<f64> = x.iter().zip(step.iter()).map(|(a, b)| a + b).collect();
                let candidate = bounds.clamp(&moved);
                let r_candidate = residuals(problem, &candidate)?;
                let cost_candidate = half_norm_squared(&r_candidate);

                if cost_candidate.is_finite() && cost_candidate < cost {
                    let dx = norm(x.iter().zip(candidate.iter()).map(|(a, b)| a - b));
                    let x_norm = norm(x.iter().copied());
                    let reduction = cost - cost_candidate;
                    let previous = cost;

                    x = candidate;
                    r = r_candidate;
                    cost = cost_candidate;
                    damping = (damping / 10.0).max(DAMPING_MIN);

                    if reduction <= self.ftol * previous || dx <= self.xtol * (self.xtol + x_norm)
                    {
                        return Ok(FitResult {
                            params: x,
                            cost,
                            iterations: iteration,
                        });
                    }
                    break;
                }

                damping *= 10.0;
                if damping > DAMPING_MAX {
                    // no step reduces the cost: only a stationary point counts
                    if is_stationary(&jac, &r, &gradient, &active) {
                        return Ok(FitResult {
                            params: x,
                            cost,
                            iterations: iteration,
                        });
                    }
                    return Err(FitError::NotConverged {
                        iterations: iteration,
                    });
                }
            }
        }

        Err(FitError::NotConverged {
            iterations: self.max_iterations,
        })
    }
}

fn residuals<P>(problem: &P, x: &[f64]) -> Result<Vec<f64>, FitError>
where
    P: Operator<Param = Vec<f64>, Output = Vec<f64>>,
{
    let r = problem
        .apply(&x.to_vec())
        .map_err(|e| FitError::Solver(e.to_string()))?;
    if r.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite { params: x.to_vec() });
    }
    Ok(r)
}

fn half_norm_squared(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

fn norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

/// Parameters on a bound whose descent direction leaves the box.
fn active_set(x: &[f64], gradient: &DVector<f64>, bounds: &Bounds) -> Vec<bool> {
    x.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let g = gradient[i];
            (xi <= bounds.lower()[i] && g > 0.0) || (xi >= bounds.upper()[i] && g < 0.0)
        })
        .collect()
}

/// Scaled gradient test over the free parameters. A corner of a piecewise
/// model blocks every damped step without being a minimum of the smooth fit.
fn is_stationary(
    jac: &DMatrix<f64>,
    r: &[f64],
    gradient: &DVector<f64>,
    active: &[bool],
) -> bool {
    let r_norm = norm(r.iter().copied());
    if r_norm == 0.0 {
        return true;
    }
    (0..gradient.len())
        .filter(|&i| !active[i])
        .all(|i| gradient[i].abs() <= GTOL * jac.column(i).norm() * r_norm)
}

/// Solves `(JᵀJ + μ·diag(JᵀJ)) δ = -Jᵀr` with pinned parameters held at δ = 0.
fn solve_damped(
    jtj: &DMatrix<f64>,
    gradient: &DVector<f64>,
    active: &[bool],
    damping: f64,
) -> Option<DVector<f64>> {
    let n = gradient.len();
    let mut a = jtj.clone();
    let mut rhs = -gradient.clone();

    for i in 0..n {
        if active[i] {
            for k in 0..n {
                a[(i, k)] = 0.0;
                a[(k, i)] = 0.0;
            }
            a[(i, i)] = 1.0;
            rhs[i] = 0.0;
        } else {
            a[(i, i)] += damping * jtj[(i, i)].max(DIAGONAL_FLOOR);
        }
    }

    let step = match a.clone().cholesky() {
        Some(cholesky) => cholesky.solve(&rhs),
        None => a.lu().solve(&rhs)?,
    };
    step.iter().all(|v| v.is_finite()).then_some(step)
}
