use ndarray::{Array3, Array4, Array5};

use crate::data::{average_m0, AslData, Timing};
use crate::error::AslError;

/// Step-by-step construction of [`AslData`].
///
/// ```ignore
/// let data = AslData::builder()
///     .pcasl(pcasl)
///     .m0(m0)
///     .mask(mask)
///     .timing(Timing::parse("3000", "500,1000,1500,2000", "10,30")?)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct AslDataBuilder {
    pcasl: Option<Array5<f64>>,
    m0: Option<Array3<f64>>,
    m0_series: Option<Array4<f64>>,
    mask: Option<Array3<f64>>,
    timing: Option<Timing>,
}

impl AslDataBuilder {
    pub fn pcasl(mut self, pcasl: Array5<f64>) -> Self {
        self.pcasl = Some(pcasl);
        self
    }

    pub fn m0(mut self, m0: Array3<f64>) -> Self {
        self.m0 = Some(m0);
        self.m0_series = None;
        self
    }

    /// Repeated M0 acquisitions `(n, z, y, x)`, averaged at build time.
    pub fn m0_series(mut self, series: Array4<f64>) -> Self {
        self.m0_series = Some(series);
        self.m0 = None;
        self
    }

    pub fn mask(mut self, mask: Array3<f64>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn build(self) -> Result<AslData, AslError> {
        let pcasl = self.pcasl.ok_or(AslError::MissingData("ASL volume"))?;
        let timing = self.timing.ok_or(AslError::MissingData("timing parameters"))?;
        let m0 = match (self.m0, self.m0_series) {
            (Some(m0), _) => m0,
            (None, Some(series)) => average_m0(&series)?,
            (None, None) => return Err(AslError::MissingData("M0 volume")),
        };
        AslData::new(pcasl, m0, self.mask, timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_m0() {
        let err = AslData::builder()
            .pcasl(Array5::zeros((1, 2, 1, 1, 1)))
            .timing(Timing::parse("1800", "500,1000", "").unwrap())
            .build();
        assert!(matches!(err, Err(AslError::MissingData("M0 volume"))));
    }

    #[test]
    fn m0_series_replaces_single_m0() {
        let data = AslData::builder()
            .pcasl(Array5::zeros((1, 2, 1, 1, 1)))
            .m0(Array3::zeros((1, 1, 1)))
            .m0_series(Array4::from_elem((3, 1, 1, 1), 900.0))
            .timing(Timing::parse("1800", "500,1000", "").unwrap())
            .build()
            .unwrap();
        assert_eq!(data.m0()[(0, 0, 0)], 900.0);
    }
}
