use serde::{Deserialize, Serialize};

use crate::error::AslError;

/// Acquisition timing of a multi-delay, multi-echo ASL protocol (all in ms).
///
/// Label durations and post-label delays are paired by index. A single label
/// duration is broadcast to every delay. Echo times form an independent axis
/// and may be empty for single-echo data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TimingValues")]
pub struct Timing {
    ld: Vec<f64>,
    pld: Vec<f64>,
    te: Vec<f64>,
}

/// Unvalidated form used for deserialization.
#[derive(Debug, Clone, Deserialize)]
struct TimingValues {
    ld: Vec<f64>,
    pld: Vec<f64>,
    #[serde(default)]
    te: Vec<f64>,
}

impl TryFrom<TimingValues> for Timing {
    type Error = AslError;

    fn try_from(values: TimingValues) -> Result<Self, Self::Error> {
        Timing::new(values.ld, values.pld, values.te)
    }
}

impl Timing {
    pub fn new(ld: Vec<f64>, pld: Vec<f64>, te: Vec<f64>) -> Result<Self, AslError> {
        if pld.is_empty() {
            return Err(AslError::InvalidTiming {
                reason: "at least one post-label delay is required".to_string(),
            });
        }
        let ld = match ld.len() {
            1 => vec![ld[0]; pld.len()],
            n if n == pld.len() => ld,
            n => {
                return Err(AslError::InvalidTiming {
                    reason: format!(
                        "{} label durations for {} post-label delays",
                        n,
                        pld.len()
                    ),
                })
            }
        };

        for (name, values) in [("LD", &ld), ("PLD", &pld), ("TE", &te)] {
            if let Some(bad) = values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
                return Err(AslError::InvalidTiming {
                    reason: format!("{} values must be strictly positive, found {}", name, bad),
                });
            }
        }

        Ok(Self { ld, pld, te })
    }

    /// Parses the three sequences from text, see [`parse_values`].
    pub fn parse(ld: &str, pld: &str, te: &str) -> Result<Self, AslError> {
        Self::new(parse_values(ld)?, parse_values(pld)?, parse_values(te)?)
    }

    pub fn ld(&self) -> &[f64] {
        &self.ld
    }

    pub fn pld(&self) -> &[f64] {
        &self.pld
    }

    pub fn te(&self) -> &[f64] {
        &self.te
    }

    pub fn n_delays(&self) -> usize {
        self.pld.len()
    }

    pub fn n_echoes(&self) -> usize {
        self.te.len()
    }

    /// `(tau, w, te)` for every (delay, echo) combination, delay-major:
    /// entry `i * n_echoes + j` pairs delay `i` with echo `j`.
    pub fn echo_grid(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let n = self.pld.len() * self.te.len();
        let mut tau = Vec::with_capacity(n);
        let mut w = Vec::with_capacity(n);
        let mut te = Vec::with_capacity(n);
        for (&ld, &pld) in self.ld.iter().zip(self.pld.iter()) {
            for &echo in &self.te {
                tau.push(ld);
                w.push(pld);
                te.push(echo);
            }
        }
        (tau, w, te)
    }
}

/// Parses a list of numbers separated by commas and/or whitespace.
///
/// An empty string yields an empty list.
pub fn parse_values(text: &str) -> Result<Vec<f64>, AslError> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<f64>().map_err(|_| AslError::InvalidTiming {
                reason: format!("'{}' is not a number", token),
            })
        })
        .collect()
}
