//! Synthetic ASL acquisitions generated from known parameter maps.

use ndarray::{Array3, Array5};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::data::{AslData, Timing, Voxel};
use crate::error::AslError;
use crate::model::{buxton, multi_te, BuxtonConstants, MultiTeConstants};

/// Signal model used to generate a phantom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardModel {
    /// Single-compartment signal, identical on every echo
    Buxton,
    /// Two-compartment signal evaluated at every echo time
    MultiTe,
}

/// Ground-truth parameter maps from which an acquisition is simulated.
#[derive(Debug, Clone)]
pub struct Phantom {
    cbf: Array3<f64>,
    att: Array3<f64>,
    t1blgm: Array3<f64>,
    m0: Array3<f64>,
    mask: Option<Array3<f64>>,
    noise_sd: f64,
    seed: u64,
}

impl Phantom {
    /// Every voxel carries the same parameters.
    pub fn uniform(dim: Voxel, cbf: f64, att: f64, t1blgm: f64, m0: f64) -> Self {
        Self {
            cbf: Array3::from_elem(dim, cbf),
            att: Array3::from_elem(dim, att),
            t1blgm: Array3::from_elem(dim, t1blgm),
            m0: Array3::from_elem(dim, m0),
            mask: None,
            noise_sd: 0.0,
            seed: 0,
        }
    }

    pub fn from_maps(
        cbf: Array3<f64>,
        att: Array3<f64>,
        t1blgm: Array3<f64>,
        m0: Array3<f64>,
    ) -> Result<Self, AslError> {
        for (what, map) in [("ATT map", &att), ("T1blGM map", &t1blgm), ("M0", &m0)] {
            if map.dim() != cbf.dim() {
                return Err(AslError::ShapeMismatch {
                    what: what.to_string(),
                    expected: cbf.shape().to_vec(),
                    found: map.shape().to_vec(),
                });
            }
        }
        Ok(Self {
            cbf,
            att,
            t1blgm,
            m0,
            mask: None,
            noise_sd: 0.0,
            seed: 0,
        })
    }

    pub fn with_mask(mut self, mask: Array3<f64>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Adds zero-mean Gaussian noise with standard deviation `sd`, reproducible through `seed`.
    pub fn with_noise(mut self, sd: f64, seed: u64) -> Self {
        self.noise_sd = sd;
        self.seed = seed;
        self
    }

    pub fn simulate(
        &self,
        timing: &Timing,
        model: ForwardModel,
        buxton_constants: &BuxtonConstants,
        multi_te_constants: &MultiTeConstants,
    ) -> Result<AslData, AslError> {
        if model == ForwardModel::MultiTe && timing.n_echoes() == 0 {
            return Err(AslError::InvalidTiming {
                reason: "the two-compartment model needs at least one echo time".to_string(),
            });
        }

        let (nz, ny, nx) = self.m0.dim();
        let n_echoes = timing.n_echoes().max(1);
        let n_delays = timing.n_delays();
        let mut pcasl = Array5::zeros((n_echoes, n_delays, nz, ny, nx));
        let (tau, w, te) = timing.echo_grid();

        for ((z, y, x), &m0) in self.m0.indexed_iter() {
            let voxel = (z, y, x);
            let (cbf, att) = (self.cbf[voxel], self.att[voxel]);
            match model {
                ForwardModel::Buxton => {
                    let signal =
                        buxton(timing.ld(), timing.pld(), m0, cbf, att, buxton_constants);
                    for echo in 0..n_echoes {
                        for (delay, &value) in signal.iter().enumerate() {
                            pcasl[(echo, delay, z, y, x)] = value;
                        }
                    }
                }
                ForwardModel::MultiTe => {
                    let signal = multi_te(
                        &tau,
                        &w,
                        &te,
                        m0,
                        cbf,
                        att,
                        self.t1blgm[voxel],
                        multi_te_constants,
                    );
                    for (k, &value) in signal.iter().enumerate() {
                        pcasl[(k % n_echoes, k / n_echoes, z, y, x)] = value;
                    }
                }
            }
        }

        if self.noise_sd > 0.0 {
            let normal = Normal::new(0.0, self.noise_sd).map_err(|e| AslError::InvalidSettings {
                reason: format!("noise standard deviation {}: {}", self.noise_sd, e),
            })?;
            let mut rng = StdRng::seed_from_u64(self.seed);
            pcasl.iter_mut().for_each(|v| *v += normal.sample(&mut rng));
        }

        AslData::new(pcasl, self.m0.clone(), self.mask.clone(), timing.clone())
    }
}
