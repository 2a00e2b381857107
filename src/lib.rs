pub mod data;
pub mod error;
pub mod mapping;
pub mod model;
pub mod optimize;
pub mod settings;

pub use crate::data::{AslData, AslDataBuilder, Timing};
pub use crate::mapping::{FitSummary, PerfusionMapping, PerfusionMaps, Stages, VoxelStatus};
pub use crate::settings::{RunConfig, Settings, CBF_SCALE};
pub use error::{AslError, FitError};

pub mod prelude {
    pub mod data {
        pub use crate::data::{
            average_m0, parse_values, AslData, AslDataBuilder, ForwardModel, Phantom, Timing,
        };
    }
    pub mod models {
        pub use crate::model::{
            buxton, multi_te, multi_te_sample, BuxtonConstants, MultiTeConstants, Relaxation,
        };
    }
    pub mod fitting {
        pub use crate::optimize::{
            fit, fit_multistart, linear_space, start_grid, Bounds, FitOptions, FitResult,
            LevenbergMarquardt, Method,
        };
    }

    pub use crate::data::*;
    pub use crate::error::{AslError, FitError};
    pub use crate::mapping::{FitSummary, PerfusionMapping, PerfusionMaps, Stages, VoxelStatus};
    pub use crate::settings::{RunConfig, Settings, StageSettings, CBF_SCALE};
}
