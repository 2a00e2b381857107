use crate::data::Timing;
use crate::error::{AslError, FitError};
use crate::mapping::VoxelStatus;
use crate::model::{buxton, multi_te};
use crate::optimize::{fit_multistart, Bounds};
use crate::settings::Settings;

/// Read-only state shared by every voxel of a run.
#[derive(Debug)]
pub struct FitContext<'a> {
    settings: &'a Settings,
    ld: &'a [f64],
    pld: &'a [f64],
    tau: Vec<f64>,
    w: Vec<f64>,
    te: Vec<f64>,
    stage1: Bounds,
    stage2: Bounds,
    stage1_starts: Vec<Vec<f64>>,
    stage2_starts: Vec<Vec<f64>>,
}

impl<'a> FitContext<'a> {
    pub fn new(timing: &'a Timing, settings: &'a Settings) -> Result<Self, AslError> {
        let (tau, w, te) = timing.echo_grid();
        Ok(Self {
            settings,
            ld: timing.ld(),
            pld: timing.pld(),
            tau,
            w,
            te,
            stage1: settings.stage1.bounds()?,
            stage2: settings.stage2.bounds()?,
            stage1_starts: settings.stage1.starts(),
            stage2_starts: settings.stage2.starts(),
        })
    }

    /// Fits (CBF, ATT) of the single-compartment model to the first-echo series.
    pub fn fit_cbf_att(&self, signal: &[f64], m0: f64) -> Result<(f64, f64), FitError> {
        let constants = &self.settings.buxton;
        let model = |p: &[f64]| buxton(self.ld, self.pld, m0, p[0], p[1], constants);
        let result = fit_multistart(
            model,
            signal,
            &self.stage1_starts,
            &self.stage1,
            &self.settings.fit,
        )?;
        Ok((result.params[0], result.params[1]))
    }

    /// Fits T1blGM of the two-compartment model to the full (delay, echo)
    /// series with CBF and ATT held at their first-stage values.
    pub fn fit_t1blgm(
        &self,
        signal: &[f64],
        m0: f64,
        cbf: f64,
        att: f64,
    ) -> Result<f64, FitError> {
        let constants = &self.settings.multi_te;
        let model =
            |p: &[f64]| multi_te(&self.tau, &self.w, &self.te, m0, cbf, att, p[0], constants);
        let result = fit_multistart(
            model,
            signal,
            &self.stage2_starts,
            &self.stage2,
            &self.settings.fit,
        )?;
        Ok(result.params[0])
    }
}

/// Values written to the output maps for one voxel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VoxelFit {
    /// Fitted flow in per-ms fractional units, unscaled
    pub cbf: f64,
    pub att: f64,
    pub t1blgm: f64,
    pub status: VoxelStatus,
}

/// Runs the two-stage state machine for one masked voxel.
///
/// `multi_echo` is `None` when only the first stage is requested. Any failure
/// leaves the affected parameters at zero.
pub fn process_voxel(
    context: &FitContext<'_>,
    m0: f64,
    first_echo: &[f64],
    multi_echo: Option<&[f64]>,
) -> VoxelFit {
    let (cbf, att) = match context.fit_cbf_att(first_echo, m0) {
        Ok(params) => params,
        Err(e) => {
            tracing::debug!("CBF/ATT fit failed: {}", e);
            return VoxelFit {
                status: VoxelStatus::Stage1Failed,
                ..Default::default()
            };
        }
    };

    let Some(signal) = multi_echo else {
        return VoxelFit {
            cbf,
            att,
            t1blgm: 0.0,
            status: VoxelStatus::Stage1Done,
        };
    };

    match context.fit_t1blgm(signal, m0, cbf, att) {
        Ok(t1blgm) => VoxelFit {
            cbf,
            att,
            t1blgm,
            status: VoxelStatus::Stage2Done,
        },
        Err(e) => {
            tracing::debug!("T1blGM fit failed: {}", e);
            VoxelFit {
                cbf,
                att,
                t1blgm: 0.0,
                status: VoxelStatus::Stage2Failed,
            }
        }
    }
}
