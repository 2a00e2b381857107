//! Deterministic starting points for multistart fits.

/// `steps` evenly spaced points from `min` to `max`, both included.
pub fn linear_space(min: f64, max: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let step = (max - min) / (steps as f64 - 1.0);
            (0..steps).map(|i| min + step * i as f64).collect()
        }
    }
}

/// Cartesian product of one axis per parameter. The first axis varies
/// slowest, so the order of the returned points is fixed.
pub fn start_grid(axes: &[Vec<f64>]) -> Vec<Vec<f64>> {
    if axes.is_empty() {
        return Vec::new();
    }
    axes.iter().fold(vec![Vec::new()], |points, axis| {
        points
            .iter()
            .flat_map(|point| {
                axis.iter().map(move |&value| {
                    let mut next = point.clone();
                    next.push(value);
                    next
                })
            })
            .collect()
    })
}
