//! # Stereo Point Clouds
//!
//! This crate turns rectified stereo pairs into colour mapped disparity images and coloured
//! point clouds, and provides an interactive tuner for the disparity matcher parameters.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod block_matching;
pub mod calibration;
mod disparity;
mod error;
pub mod frame;
pub mod frontend;
pub mod mask;
pub mod pipeline;
pub mod ply;
pub mod point_cloud;
pub mod semi_global;
pub mod settings;
#[doc(hidden)]
pub mod test_utils;
pub mod tuner;
pub mod visualize;

#[cfg(feature = "statistics")]
pub mod statistics;
#[cfg(feature = "window")]
pub mod window;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use disparity::{
    DisparityAlgorithm, DisparityMap, MatcherKind, ParameterConstraint, ParameterSpec
};
pub use error::{Error, Result};

pub mod prelude {
    pub use crate::calibration::{DisparityToDepth, RectifiedPair, StereoCalibration};
    pub use crate::disparity::{DisparityAlgorithm, DisparityMap, MatcherKind};
    pub use crate::frame::{FrameSource, StereoFrame};
    pub use crate::frontend::{Frontend, TunerEvent};
    pub use crate::mask::ValidityMask;
    pub use crate::pipeline::{ExportConfig, StereoPipeline};
    pub use crate::ply::PlyFormat;
    pub use crate::point_cloud::{Point3D, PointCloud};
    pub use crate::tuner::{Tuner, TunerConfig};
}
