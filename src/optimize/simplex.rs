use argmin::{
    core::{CostFunction, Executor, State, TerminationReason},
    solver::neldermead::NelderMead,
};

use super::{Bounds, FitOptions, FitResult};
use crate::error::FitError;

/// Minimizes `problem` with a Nelder–Mead simplex started around `initial`.
///
/// The cost function is expected to project its argument onto `bounds`; the
/// returned parameters are projected as well.
pub fn minimize<P>(
    problem: P,
    initial: &[f64],
    bounds: &Bounds,
    options: &FitOptions,
) -> Result<FitResult, FitError>
where
    P: CostFunction<Param = Vec<f64>, Output = f64>,
{
    let start = bounds.clamp(initial);
    let simplex = create_initial_simplex(&start, bounds);
    let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(simplex)
        .with_sd_tolerance(options.simplex_tolerance)
        .map_err(|e| FitError::Solver(e.to_string()))?;

    let res = Executor::new(problem, solver)
        .configure(|state| state.max_iters(options.max_iterations as u64))
        .run()
        .map_err(|e| FitError::Solver(e.to_string()))?;

    let iterations = res.state.get_iter() as usize;
    if let Some(TerminationReason::MaxItersReached) = res.state.get_termination_reason() {
        return Err(FitError::NotConverged { iterations });
    }

    let cost = res.state.get_best_cost();
    let best = res
        .state
        .best_param
        .ok_or_else(|| FitError::Solver("simplex produced no parameters".to_string()))?;
    if !cost.is_finite() {
        return Err(FitError::NonFinite { params: best });
    }

    Ok(FitResult {
        params: bounds.clamp(&best),
        cost,
        iterations,
    })
}

/// Initial simplex: the start point plus one vertex per parameter, each moved
/// by 5% of its value (or of the bound width at zero), towards the interior.
fn create_initial_simplex(initial_point: &[f64], bounds: &Bounds) -> Vec<Vec<f64>> {
    let perturbation_percentage = 0.05;

    let mut vertices = Vec::with_capacity(initial_point.len() + 1);
    vertices.push(initial_point.to_vec());

    for i in 0..initial_point.len() {
        let (lo, hi) = (bounds.lower()[i], bounds.upper()[i]);
        let mut perturbation = if initial_point[i] == 0.0 {
            perturbation_percentage * (hi - lo)
        } else {
            perturbation_percentage * initial_point[i].abs()
        };
        if initial_point[i] + perturbation > hi {
            perturbation = -perturbation;
        }

        let mut perturbed_point = initial_point.to_vec();
        perturbed_point[i] += perturbation;
        vertices.push(perturbed_point);
    }

    vertices
}
