//! Synthetic stereo scenes for tests and benchmarks.
//!
//! This module is public so integration tests and benches can share it, but it is not intended
//! for production use.

use image::{Rgb, RgbImage};

use crate::calibration::{DisparityToDepth, RectifiedPair, StereoCalibration};
use crate::frame::StereoFrame;

/// Deterministic high-frequency texture value at a pixel.
pub fn texture(x: u32, y: u32) -> u8 {
    let h = (x.wrapping_mul(2654435761) ^ y.wrapping_mul(40503)).rotate_left(7);
    (h % 251) as u8
}

/// A fronto-parallel textured plane seen with a constant disparity of `shift` pixels.
pub fn shifted_pair(width: u32, height: u32, shift: u32) -> RectifiedPair {
    let left = RgbImage::from_fn(width, height, |x, y| {
        let v = texture(x, y);
        Rgb([v, v, v])
    });
    let right = RgbImage::from_fn(width, height, |x, y| {
        let v = texture(x + shift, y);
        Rgb([v, v, v])
    });
    RectifiedPair { left, right }
}

/// The same scene as [`shifted_pair`], as an unrectified frame.
pub fn shifted_frame(width: u32, height: u32, shift: u32) -> StereoFrame {
    let pair = shifted_pair(width, height, shift);
    StereoFrame::new(pair.left, pair.right)
}

/// Calibration for already rectified images from a pinhole pair with focal length 100 px,
/// baseline 0.1 and the principal point at the image centre.
pub fn pinhole_calibration(width: u32, height: u32) -> StereoCalibration {
    let q = DisparityToDepth::from_pinhole(
        100.0,
        0.1,
        width as f64 / 2.0,
        height as f64 / 2.0
    )
    .expect("valid pinhole transform");
    StereoCalibration::prerectified(q)
}
