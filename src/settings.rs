//! Run settings and pre-flight validation.
//!
//! [`Settings`] carries everything the voxel loop needs besides the volumes
//! and can be read from JSON. [`RunConfig`] is the structured form of a
//! command-line invocation; its checks take the configuration as an argument
//! instead of reading any global state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::Timing;
use crate::error::AslError;
use crate::model::{BuxtonConstants, MultiTeConstants};
use crate::optimize::{linear_space, start_grid, Bounds, FitOptions};

/// Factor converting per-ms fractional flow to the reported CBF units.
pub const CBF_SCALE: f64 = 60.0 * 60.0 * 1000.0;

/// Initial guess and box of one fitting stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSettings {
    pub initial: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Further starting points tried after `initial`; the lowest-cost fit wins
    #[serde(default)]
    pub restarts: Vec<Vec<f64>>,
}

impl StageSettings {
    /// (CBF, ATT) for the single-compartment fit.
    ///
    /// Restarts cover CBF × ATT on a fixed grid. ATT steps of 500 ms put a
    /// start between every pair of regime changes for the usual PLD spacing.
    pub fn cbf_att() -> Self {
        Self {
            initial: vec![1e-5, 1000.0],
            lower: vec![0.0, 0.0],
            upper: vec![1.0, 5000.0],
            restarts: start_grid(&[
                vec![1e-5, 0.002, 0.01, 0.03],
                linear_space(250.0, 4250.0, 9),
            ]),
        }
    }

    /// T1blGM for the two-compartment fit.
    pub fn t1blgm() -> Self {
        Self {
            initial: vec![400.0],
            lower: vec![0.0],
            upper: vec![1500.0],
            restarts: vec![vec![100.0], vec![20.0]],
        }
    }

    /// `initial` followed by every restart.
    pub fn starts(&self) -> Vec<Vec<f64>> {
        std::iter::once(self.initial.clone())
            .chain(self.restarts.iter().cloned())
            .collect()
    }

    pub fn bounds(&self) -> Result<Bounds, AslError> {
        Bounds::new(self.lower.clone(), self.upper.clone()).map_err(|e| {
            AslError::InvalidSettings {
                reason: e.to_string(),
            }
        })
    }

    fn validate(&self, name: &str, n_params: usize) -> Result<(), AslError> {
        if let Some(start) = self.starts().iter().find(|s| s.len() != n_params) {
            return Err(AslError::InvalidSettings {
                reason: format!(
                    "{} expects {} values per starting point, found {:?}",
                    name, n_params, start
                ),
            });
        }
        let bounds = self.bounds()?;
        if bounds.len() != n_params {
            return Err(AslError::InvalidSettings {
                reason: format!("{} expects {} bounds, found {}", name, n_params, bounds.len()),
            });
        }
        Ok(())
    }
}

/// Settings of a mapping run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub buxton: BuxtonConstants,
    pub multi_te: MultiTeConstants,
    pub stage1: StageSettings,
    pub stage2: StageSettings,
    pub fit: FitOptions,
    /// Worker threads; -1 uses every available core. A count above the
    /// machine's available threads is accepted and only logs a warning.
    pub threads: i64,
    /// Multiplier applied to the fitted flow before it is written to the CBF map
    pub cbf_scale: f64,
    pub show_progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buxton: BuxtonConstants::default(),
            multi_te: MultiTeConstants::default(),
            stage1: StageSettings::cbf_att(),
            stage2: StageSettings::t1blgm(),
            fit: FitOptions::default(),
            threads: -1,
            cbf_scale: CBF_SCALE,
            show_progress: false,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, AslError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AslError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, AslError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_threads(mut self, threads: i64) -> Self {
        self.threads = threads;
        self
    }

    pub fn validate(&self) -> Result<(), AslError> {
        if self.threads == 0 || self.threads < -1 {
            return Err(AslError::InvalidSettings {
                reason: format!(
                    "Number of threads must be -1 (to use all available threads) or a positive integer. Current value: {}.",
                    self.threads
                ),
            });
        }
        let available = available_threads();
        if self.threads > available as i64 {
            tracing::warn!(
                "Number of threads ({}) is higher than the available number of threads ({})",
                self.threads,
                available
            );
        }
        if self.fit.max_iterations == 0 {
            return Err(AslError::InvalidSettings {
                reason: "fit.max_iterations must be positive".to_string(),
            });
        }
        if !(self.cbf_scale.is_finite() && self.cbf_scale > 0.0) {
            return Err(AslError::InvalidSettings {
                reason: format!("cbf_scale must be positive, found {}", self.cbf_scale),
            });
        }
        self.stage1.validate("stage1", 2)?;
        self.stage2.validate("stage2", 1)?;
        Ok(())
    }

    /// Thread count handed to rayon; 0 selects rayon's default (all cores).
    pub(crate) fn pool_threads(&self) -> usize {
        if self.threads < 0 {
            0
        } else {
            self.threads as usize
        }
    }
}

pub(crate) fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Structured configuration of one invocation: file locations, timing as
/// given on the command line, and the run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub asl: PathBuf,
    pub m0: PathBuf,
    #[serde(default)]
    pub mask: Option<PathBuf>,
    #[serde(default)]
    pub out_folder: Option<PathBuf>,
    pub ld: String,
    pub pld: String,
    #[serde(default)]
    pub te: String,
    #[serde(default)]
    pub average_m0: bool,
    #[serde(default)]
    pub settings: Settings,
}

impl RunConfig {
    /// Runs every pre-flight check and returns the parsed timing.
    ///
    /// All failures are collected so that they can be reported together.
    pub fn validate(&self) -> Result<Timing, AslError> {
        let mut problems = Vec::new();

        if let Some(folder) = &self.out_folder {
            if folder != Path::new(".") && !folder.is_dir() {
                problems.push(AslError::MissingInput {
                    what: "Output folder".to_string(),
                    path: folder.clone(),
                });
            }
        }
        let inputs = [
            ("ASL input file", Some(&self.asl)),
            ("M0 input file", Some(&self.m0)),
            ("Brain mask file", self.mask.as_ref()),
        ];
        for (what, path) in inputs {
            if let Some(path) = path {
                if path.as_os_str().is_empty() || !path.is_file() {
                    problems.push(AslError::MissingInput {
                        what: what.to_string(),
                        path: path.clone(),
                    });
                }
            }
        }
        if let Err(e) = self.settings.validate() {
            problems.push(e);
        }
        let timing = match Timing::parse(&self.ld, &self.pld, &self.te) {
            Ok(timing) => Some(timing),
            Err(e) => {
                problems.push(e);
                None
            }
        };

        match (timing, problems.len()) {
            (Some(timing), 0) => Ok(timing),
            (_, 1) => Err(problems.remove(0)),
            _ => Err(AslError::Validation(problems)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn defaults_match_reference_protocol() {
        let settings = Settings::default();
        assert_eq!(settings.stage1.initial, vec![1e-5, 1000.0]);
        assert_eq!(settings.stage1.restarts.len(), 36);
        assert_eq!(settings.stage1.restarts[0], vec![1e-5, 250.0]);
        assert_eq!(settings.stage1.restarts[35], vec![0.03, 4250.0]);
        assert_eq!(settings.stage2.starts(), vec![vec![400.0], vec![100.0], vec![20.0]]);
        assert_eq!(settings.stage2.upper, vec![1500.0]);
        assert_eq!(settings.cbf_scale, 3_600_000.0);
        assert_eq!(settings.multi_te.t2b, 165.0);
        assert_eq!(settings.multi_te.t2csf, 75.0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = Settings::from_json(r#"{"threads": 2, "multi_te": {"t2b": 80.0}}"#).unwrap();
        assert_eq!(settings.threads, 2);
        assert_eq!(settings.multi_te.t2b, 80.0);
        assert_eq!(settings.multi_te.t1csf, 1400.0);
        assert_eq!(settings.buxton, BuxtonConstants::default());
    }

    #[test]
    fn settings_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings::default().with_threads(3);
        std::fs::write(&path, settings.to_json().unwrap()).unwrap();
        assert_eq!(Settings::from_file(&path).unwrap(), settings);
    }

    #[test]
    fn invalid_thread_counts_are_rejected() {
        assert!(Settings::default().with_threads(0).validate().is_err());
        assert!(Settings::default().with_threads(-2).validate().is_err());
        assert!(Settings::default().with_threads(1).validate().is_ok());
        let oversubscribed = available_threads() as i64 + 4;
        assert!(Settings::default().with_threads(oversubscribed).validate().is_ok());
    }

    #[test]
    fn restart_dimensions_are_checked() {
        let mut settings = Settings::default();
        settings.stage1.restarts.push(vec![0.01]);
        assert!(settings.validate().is_err());
        assert_eq!(Settings::default().stage1.starts()[0], vec![1e-5, 1000.0]);
    }

    #[test]
    fn inverted_stage_bounds_are_rejected() {
        let mut settings = Settings::default();
        settings.stage2.lower = vec![2000.0];
        assert!(matches!(
            settings.validate(),
            Err(AslError::InvalidSettings { .. })
        ));
    }

    fn config(dir: &Path) -> RunConfig {
        RunConfig {
            asl: dir.join("asl.nii.gz"),
            m0: dir.join("m0.nii.gz"),
            mask: None,
            out_folder: Some(dir.to_path_buf()),
            ld: "3000".to_string(),
            pld: "500,1000,1500,2000".to_string(),
            te: "10 30".to_string(),
            average_m0: false,
            settings: Settings::default(),
        }
    }

    #[test]
    fn run_config_accepts_existing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        File::create(&config.asl).unwrap();
        File::create(&config.m0).unwrap();

        let timing = config.validate().unwrap();
        assert_eq!(timing.n_delays(), 4);
        assert_eq!(timing.te(), &[10.0, 30.0]);
    }

    #[test]
    fn run_config_reports_every_problem() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.out_folder = Some(dir.path().join("missing"));
        config.settings.threads = 0;

        match config.validate() {
            Err(AslError::Validation(problems)) => assert_eq!(problems.len(), 4),
            other => panic!("expected aggregated validation error, got {:?}", other),
        }
    }
}
