pub mod builder;
pub mod synthetic;
pub mod timing;

pub use builder::AslDataBuilder;
pub use synthetic::{ForwardModel, Phantom};
pub use timing::{parse_values, Timing};

use ndarray::{s, Array3, Array4, Array5, Axis};

use crate::error::AslError;

/// Spatial index `(z, y, x)`.
pub type Voxel = (usize, usize, usize);

/// A multi-delay, multi-echo ASL acquisition ready to be mapped.
///
/// The ASL volume is indexed `(echo, delay, z, y, x)`; M0 and the brain mask
/// share its spatial shape. All volumes are read-only once constructed.
#[derive(Debug, Clone)]
pub struct AslData {
    pcasl: Array5<f64>,
    m0: Array3<f64>,
    mask: Array3<f64>,
    timing: Timing,
}

impl AslData {
    pub fn builder() -> AslDataBuilder {
        AslDataBuilder::default()
    }

    /// Checks every shape against the ASL volume and the timing.
    ///
    /// A missing mask selects every voxel.
    pub fn new(
        pcasl: Array5<f64>,
        m0: Array3<f64>,
        mask: Option<Array3<f64>>,
        timing: Timing,
    ) -> Result<Self, AslError> {
        let (n_echoes, n_delays, nz, ny, nx) = pcasl.dim();
        let spatial = [nz, ny, nx];

        let expected_echoes = timing.n_echoes().max(1);
        if n_echoes != expected_echoes || n_delays != timing.n_delays() {
            return Err(AslError::ShapeMismatch {
                what: "ASL (echo, delay) axes".to_string(),
                expected: vec![expected_echoes, timing.n_delays()],
                found: vec![n_echoes, n_delays],
            });
        }
        if m0.shape() != spatial {
            return Err(AslError::ShapeMismatch {
                what: "M0".to_string(),
                expected: spatial.to_vec(),
                found: m0.shape().to_vec(),
            });
        }
        let mask = mask.unwrap_or_else(|| Array3::ones((nz, ny, nx)));
        if mask.shape() != spatial {
            return Err(AslError::ShapeMismatch {
                what: "brain mask".to_string(),
                expected: spatial.to_vec(),
                found: mask.shape().to_vec(),
            });
        }

        Ok(Self {
            pcasl,
            m0,
            mask,
            timing,
        })
    }

    pub fn pcasl(&self) -> &Array5<f64> {
        &self.pcasl
    }

    pub fn m0(&self) -> &Array3<f64> {
        &self.m0
    }

    pub fn mask(&self) -> &Array3<f64> {
        &self.mask
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Spatial shape `(z, y, x)`.
    pub fn spatial_dim(&self) -> Voxel {
        self.m0.dim()
    }

    pub fn is_masked(&self, voxel: Voxel) -> bool {
        self.mask[voxel] != 0.0
    }

    pub fn masked_voxels(&self) -> usize {
        self.mask.iter().filter(|&&v| v != 0.0).count()
    }

    /// First-echo intensities across all delays at `voxel`.
    pub fn first_echo_signal(&self, voxel: Voxel) -> Vec<f64> {
        let (z, y, x) = voxel;
        self.pcasl.slice(s![0, .., z, y, x]).to_vec()
    }

    /// Every (delay, echo) intensity at `voxel`, delay-major as in
    /// [`Timing::echo_grid`].
    pub fn multi_echo_signal(&self, voxel: Voxel) -> Vec<f64> {
        let (z, y, x) = voxel;
        let series = self.pcasl.slice(s![.., .., z, y, x]);
        series.t().iter().copied().collect()
    }
}

/// Averages an M0 series `(n, z, y, x)` along its first axis.
pub fn average_m0(series: &Array4<f64>) -> Result<Array3<f64>, AslError> {
    series
        .mean_axis(Axis(0))
        .ok_or(AslError::MissingData("M0 repetition"))
}
