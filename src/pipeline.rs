//! # Per-frame stereo pipeline
//!
//! Runs one frame through rectification, disparity computation and visualisation, and exports
//! point clouds and rectified pairs from the result. Both the one-shot capture and the tuner are
//! built on [`StereoPipeline`].

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::{RectifiedPair, StereoCalibration};
use crate::disparity::{DisparityAlgorithm, DisparityMap};
use crate::error::*;
use crate::frame::{FrameSource, StereoFrame};
use crate::mask::ValidityMask;
use crate::ply::PlyFormat;
use crate::point_cloud::PointCloud;
use crate::visualize::{visualize, ColorDisparity};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct StereoPipeline {
    calibration: StereoCalibration,
    matcher: Box<dyn DisparityAlgorithm>
}

/// Everything computed for one frame.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub pair: RectifiedPair,
    pub disparity: DisparityMap,
    pub color: ColorDisparity
}

/// Where and how a capture is written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// PLY file for the point cloud.
    pub point_cloud: Option<PathBuf>,
    pub ply_format: PlyFormat,
    /// Directory receiving `left.ppm` and `right.ppm`.
    pub image_pair_dir: Option<PathBuf>,
    /// Points further away than this are not exported.
    pub max_depth: Option<f32>
}

/// What an export produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub points: usize,
    pub pixels: usize,
    pub point_cloud: Option<PathBuf>,
    pub image_pair_dir: Option<PathBuf>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl StereoPipeline {
    /// Assemble a pipeline, checking the matcher's disparity range can be visualised.
    pub fn new(calibration: StereoCalibration, matcher: Box<dyn DisparityAlgorithm>) -> Result<Self> {
        check_range(matcher.as_ref())?;
        Ok(Self { calibration, matcher })
    }

    pub fn calibration(&self) -> &StereoCalibration {
        &self.calibration
    }

    pub fn matcher(&self) -> &dyn DisparityAlgorithm {
        self.matcher.as_ref()
    }

    pub fn matcher_mut(&mut self) -> &mut dyn DisparityAlgorithm {
        self.matcher.as_mut()
    }

    /// Rectify, match and colour map one frame.
    pub fn process(&mut self, frame: &StereoFrame) -> Result<ProcessedFrame> {
        check_range(self.matcher.as_ref())?;

        let pair = self.calibration.rectify(frame)?;
        let disparity = self.matcher.compute(&pair)?;
        let color = visualize(&disparity)?;

        Ok(ProcessedFrame { pair, disparity, color })
    }

    /// Reconstruct the point cloud of a processed pair, coloured from the left image.
    pub fn point_cloud(&self, pair: &RectifiedPair, disparity: &DisparityMap) -> Result<PointCloud> {
        let mask = ValidityMask::export(disparity);
        PointCloud::from_disparity(
            disparity,
            self.calibration.disparity_to_depth(),
            &pair.left,
            &mask
        )
    }

    /// Build the point cloud and write it and the rectified pair where configured.
    pub fn export(
        &self,
        pair: &RectifiedPair,
        disparity: &DisparityMap,
        config: &ExportConfig
    ) -> Result<ExportSummary> {
        let mut cloud = self.point_cloud(pair, disparity)?;
        if let Some(max_depth) = config.max_depth {
            cloud.retain_within_depth(max_depth);
        }

        if let Some(path) = &config.point_cloud {
            cloud.write_ply(path, config.ply_format)?;
        }
        if let Some(dir) = &config.image_pair_dir {
            pair.write_to_dir(dir)?;
        }

        Ok(ExportSummary {
            points: cloud.len(),
            pixels: disparity.len(),
            point_cloud: config.point_cloud.clone(),
            image_pair_dir: config.image_pair_dir.clone()
        })
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn check_range(matcher: &dyn DisparityAlgorithm) -> Result<()> {
    if matcher.num_disparities() <= 1 {
        return Err(Error::invalid_parameter(
            "num_disparities",
            format!("{} leaves no disparity range to search", matcher.num_disparities())
        ));
    }
    Ok(())
}

/// Wait for a frame, polling through starvation.
pub fn next_frame(source: &mut dyn FrameSource, poll_interval: Duration) -> Result<StereoFrame> {
    let mut polls = 0usize;
    loop {
        if let Some(frame) = source.get_frame_pair()? {
            if polls > 0 {
                log::debug!("Frame from {} arrived after {} polls", source.device(), polls);
            }
            return Ok(frame);
        }
        polls += 1;
        log::trace!("No frame ready from {}, polling again", source.device());
        std::thread::sleep(poll_interval);
    }
}

/// Acquire one frame, reconstruct it and write the configured outputs.
pub fn capture_once(
    source: &mut dyn FrameSource,
    pipeline: &mut StereoPipeline,
    config: &ExportConfig,
    poll_interval: Duration
) -> Result<ExportSummary> {
    let frame = next_frame(source, poll_interval)?;
    let processed = pipeline.process(&frame)?;

    let summary = pipeline.export(&processed.pair, &processed.disparity, config)?;
    log::info!(
        "Captured {} points from {} pixels",
        summary.points, summary.pixels
    );
    Ok(summary)
}
