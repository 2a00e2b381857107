//! Voxel-wise perfusion mapping.
//!
//! Every masked voxel goes through the same two-stage fit: the Buxton model
//! on the first-echo delay series gives CBF and ATT, which are then held
//! fixed while the two-compartment model is fitted to the full delay × echo
//! series for T1blGM. Voxels are independent and are processed on a rayon
//! pool, each worker writing only the map entries of its own voxel.

pub mod maps;
pub mod progress;
pub mod voxel;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array3, Zip};

use crate::data::AslData;
use crate::error::AslError;
use crate::settings::Settings;
use progress::ProgressTracker;

pub use maps::{FitSummary, PerfusionMaps, VoxelStatus};
pub use voxel::{process_voxel, FitContext, VoxelFit};

/// Which fitting stages a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stages {
    /// CBF and ATT only
    CbfAtt,
    /// CBF and ATT followed by T1blGM
    MultiTe,
}

/// A mapping run over one acquisition.
///
/// ```ignore
/// let maps = PerfusionMapping::new(&data, &settings)?.multi_te_map()?;
/// println!("{}", maps.summary);
/// ```
#[derive(Debug)]
pub struct PerfusionMapping<'a> {
    data: &'a AslData,
    settings: &'a Settings,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a> PerfusionMapping<'a> {
    pub fn new(data: &'a AslData, settings: &'a Settings) -> Result<Self, AslError> {
        settings.validate()?;
        Ok(Self {
            data,
            settings,
            stop: None,
        })
    }

    /// Checked between voxels; once set, remaining voxels are left untouched
    /// and the run returns [`AslError::Cancelled`].
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Fits CBF and ATT in every masked voxel.
    pub fn cbf_att_map(&self) -> Result<PerfusionMaps, AslError> {
        self.run(Stages::CbfAtt)
    }

    /// Fits CBF, ATT and T1blGM in every masked voxel.
    pub fn multi_te_map(&self) -> Result<PerfusionMaps, AslError> {
        self.run(Stages::MultiTe)
    }

    pub fn run(&self, stages: Stages) -> Result<PerfusionMaps, AslError> {
        let data = self.data;
        let timing = data.timing();
        if stages == Stages::MultiTe && timing.n_echoes() == 0 {
            return Err(AslError::MissingData("echo time"));
        }

        tracing::info!(
            "Mapping {:?} over {} masked voxels of {:?}",
            stages,
            data.masked_voxels(),
            data.spatial_dim()
        );
        tracing::info!("LD: {:?}", timing.ld());
        tracing::info!("PLD: {:?}", timing.pld());
        tracing::info!("TE: {:?}", timing.te());

        let context = FitContext::new(timing, self.settings)?;
        let dim = data.spatial_dim();
        let mut cbf = Array3::<f64>::zeros(dim);
        let mut att = Array3::<f64>::zeros(dim);
        let mut t1blgm = Array3::<f64>::zeros(dim);
        let mut status = Array3::<VoxelStatus>::default(dim);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.pool_threads())
            .build()?;
        let tracker = ProgressTracker::new(data.masked_voxels(), self.settings.show_progress);
        let stop = self.stop.as_deref();

        pool.install(|| {
            Zip::indexed(&mut cbf)
                .and(&mut att)
                .and(&mut t1blgm)
                .and(&mut status)
                .and(data.mask())
                .par_for_each(|voxel, cbf, att, t1blgm, status, &mask| {
                    if mask == 0.0 {
                        return;
                    }
                    if stop.is_some_and(|s| s.load(Ordering::Relaxed)) {
                        *status = VoxelStatus::Cancelled;
                        return;
                    }
                    let m0 = data.m0()[voxel];
                    let first_echo = data.first_echo_signal(voxel);
                    let multi_echo = match stages {
                        Stages::CbfAtt => None,
                        Stages::MultiTe => Some(data.multi_echo_signal(voxel)),
                    };
                    let fit = process_voxel(&context, m0, &first_echo, multi_echo.as_deref());
                    *cbf = fit.cbf;
                    *att = fit.att;
                    *t1blgm = fit.t1blgm;
                    *status = fit.status;
                    tracker.inc();
                });
        });
        tracker.finish();

        let summary = FitSummary::from_status(&status);
        if summary.cancelled > 0 {
            return Err(AslError::Cancelled {
                processed: tracker.position(),
            });
        }
        tracing::info!("{}", summary);
        if summary.failed() > 0 {
            tracing::warn!(
                "{} of {} masked voxels failed to fit and were set to 0",
                summary.failed(),
                summary.masked()
            );
        }

        let scale = self.settings.cbf_scale;
        Ok(PerfusionMaps {
            cbf: cbf.mapv(|f| f * scale),
            cbf_raw: cbf,
            att,
            t1blgm,
            status,
            summary,
        })
    }
}
