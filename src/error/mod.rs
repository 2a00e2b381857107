use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a mapping run before (or instead of) the voxel loop.
///
/// Per-voxel problems are never reported through this type; they are
/// recorded as [`FitError`]s in the status map and counted in the run summary.
#[derive(Error, Debug)]
pub enum AslError {
    /// Input volumes disagree in shape
    #[error("Shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// LD/PLD/TE sequences are inconsistent or hold non-positive values
    #[error("Invalid timing parameters: {reason}")]
    InvalidTiming { reason: String },

    /// A settings value is out of range
    #[error("Invalid settings: {reason}")]
    InvalidSettings { reason: String },

    /// A required input file or folder does not exist
    #[error("{what} does not exist (path: {path})")]
    MissingInput { what: String, path: PathBuf },

    /// A volume or parameter was never handed to the builder
    #[error("No {0} was provided")]
    MissingData(&'static str),

    /// Several pre-flight checks failed at once
    #[error("One or more arguments are not well defined:\n{}", format_reasons(.0))]
    Validation(Vec<AslError>),

    /// The run was stopped through its cancellation flag
    #[error("Mapping was cancelled after {processed} voxels")]
    Cancelled { processed: usize },

    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_reasons(errors: &[AslError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failure of the nonlinear solver for a single voxel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// The iteration budget ran out before a convergence criterion was met
    #[error("Optimal parameters not found after {iterations} iterations")]
    NotConverged { iterations: usize },

    /// The model or the residuals produced NaN/inf
    #[error("Non-finite residuals at parameters {params:?}")]
    NonFinite { params: Vec<f64> },

    /// Problem definition is inconsistent (dimensions, bounds)
    #[error("Invalid fit problem: {reason}")]
    InvalidProblem { reason: String },

    /// Error reported by the underlying solver
    #[error("Solver error: {0}")]
    Solver(String),
}

/// Numeric overflow while evaluating a model sample.
///
/// Recovered locally by the model: the affected sample contributes zero signal.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("Numeric overflow evaluating model sample")]
pub struct ModelOverflow;
