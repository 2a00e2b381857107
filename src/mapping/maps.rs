use std::fmt;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Where a voxel ended up in the two-stage fitting state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoxelStatus {
    /// Outside the brain mask, never read or written
    #[default]
    Skipped,
    Stage1Failed,
    /// CBF and ATT fitted; terminal when only the first stage runs
    Stage1Done,
    Stage2Failed,
    Stage2Done,
    /// Not processed because a stop was requested
    Cancelled,
}

/// Output of a mapping run. Every map has the mask's shape and is zero outside it.
#[derive(Debug, Clone)]
pub struct PerfusionMaps {
    /// CBF in reported units (fitted flow times the configured scale)
    pub cbf: Array3<f64>,
    /// Fitted flow in per-ms fractional units
    pub cbf_raw: Array3<f64>,
    /// Arterial transit time (ms)
    pub att: Array3<f64>,
    /// Blood/GM exchange time (ms); all zero when only the first stage ran
    pub t1blgm: Array3<f64>,
    pub status: Array3<VoxelStatus>,
    pub summary: FitSummary,
}

/// Voxel counts per outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FitSummary {
    pub total: usize,
    pub skipped: usize,
    pub stage1_failed: usize,
    pub stage2_failed: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl FitSummary {
    pub fn from_status(status: &Array3<VoxelStatus>) -> Self {
        let mut summary = FitSummary {
            total: status.len(),
            ..Default::default()
        };
        for s in status.iter() {
            match s {
                VoxelStatus::Skipped => summary.skipped += 1,
                VoxelStatus::Stage1Failed => summary.stage1_failed += 1,
                VoxelStatus::Stage2Failed => summary.stage2_failed += 1,
                VoxelStatus::Stage1Done | VoxelStatus::Stage2Done => summary.completed += 1,
                VoxelStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Voxels inside the mask.
    pub fn masked(&self) -> usize {
        self.total - self.skipped
    }

    pub fn failed(&self) -> usize {
        self.stage1_failed + self.stage2_failed
    }
}

impl fmt::Display for FitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} masked voxels: {} completed, {} failed in stage 1, {} failed in stage 2",
            self.masked(),
            self.completed,
            self.stage1_failed,
            self.stage2_failed
        )?;
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_status() {
        let mut status = Array3::from_elem((2, 2, 2), VoxelStatus::Skipped);
        status[(0, 0, 0)] = VoxelStatus::Stage2Done;
        status[(0, 0, 1)] = VoxelStatus::Stage2Done;
        status[(0, 1, 0)] = VoxelStatus::Stage1Failed;
        status[(1, 1, 1)] = VoxelStatus::Stage2Failed;

        let summary = FitSummary::from_status(&status);
        assert_eq!(summary.total, 8);
        assert_eq!(summary.masked(), 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(
            summary.to_string(),
            "4 masked voxels: 2 completed, 1 failed in stage 1, 1 failed in stage 2"
        );
    }
}
