//! # Stereo calibration model
//!
//! This module loads the calibration produced by an external calibration tool and applies it:
//! each raw image is warped by its rectifying homography so that corresponding points share a
//! row, and the disparity-to-depth transform is exposed for reprojection.
//!
//! The calibration file is TOML with row-major matrices:
//!
//! ```toml
//! image_size = [640, 480]
//! left_rectification = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
//! right_rectification = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
//! disparity_to_depth = [
//!     [1.0, 0.0, 0.0, -320.0],
//!     [0.0, 1.0, 0.0, -240.0],
//!     [0.0, 0.0, 0.0, 500.0],
//!     [0.0, 0.0, 10.0, 0.0],
//! ]
//! ```

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::Path;

use image::{GrayImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use nalgebra::{Matrix3, Matrix4, Vector4};
use serde::{Deserialize, Serialize};

use crate::error::*;
use crate::frame::StereoFrame;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// The 4x4 transform mapping `(column, row, disparity, 1)` to homogeneous scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisparityToDepth(Matrix4<f64>);

/// A validated stereo calibration.
#[derive(Debug, Clone)]
pub struct StereoCalibration {
    image_size: Option<(u32, u32)>,
    left_rectification: Matrix3<f64>,
    right_rectification: Matrix3<f64>,
    left_projection: Option<Projection>,
    right_projection: Option<Projection>,
    disparity_to_depth: DisparityToDepth
}

/// Two images aligned so that corresponding scene points lie on the same row.
#[derive(Debug, Clone)]
pub struct RectifiedPair {
    pub left: RgbImage,
    pub right: RgbImage
}

/// On-disk layout of the calibration file.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    image_size: Option<[u32; 2]>,
    left_rectification: Option<Vec<Vec<f64>>>,
    right_rectification: Option<Vec<Vec<f64>>>,
    disparity_to_depth: Vec<Vec<f64>>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityToDepth {
    /// Build the transform from row-major rows, checking it is a finite 4x4 matrix in which
    /// disparity actually changes depth.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let matrix = matrix_from_rows::<4>("disparity_to_depth", rows)?;
        Self::new(Matrix4::from(matrix))
    }

    pub fn new(matrix: Matrix4<f64>) -> Result<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(Error::calibration("disparity_to_depth", "contains non-finite entries"));
        }
        if matrix[(3, 2)] == 0.0 {
            return Err(Error::calibration(
                "disparity_to_depth",
                "the homogeneous row does not depend on disparity, depth is undefined"
            ));
        }
        Ok(Self(matrix))
    }

    /// Transform for an ideal rectified pinhole pair: focal length in pixels, baseline in scene
    /// units and the principal point shared by both rectified cameras.
    pub fn from_pinhole(focal: f64, baseline: f64, cx: f64, cy: f64) -> Result<Self> {
        if baseline == 0.0 {
            return Err(Error::calibration("disparity_to_depth", "baseline is zero"));
        }
        Self::new(Matrix4::new(
            1.0, 0.0, 0.0, -cx,
            0.0, 1.0, 0.0, -cy,
            0.0, 0.0, 0.0, focal,
            0.0, 0.0, 1.0 / baseline, 0.0
        ))
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    /// Homogeneous scene coordinates of a pixel at the given disparity.
    #[inline]
    pub fn apply(&self, column: f64, row: f64, disparity: f64) -> Vector4<f64> {
        self.0 * Vector4::new(column, row, disparity, 1.0)
    }
}

impl StereoCalibration {
    pub fn new(
        left_rectification: Matrix3<f64>,
        right_rectification: Matrix3<f64>,
        disparity_to_depth: DisparityToDepth
    ) -> Result<Self> {
        let left_projection = projection_for("left_rectification", &left_rectification)?;
        let right_projection = projection_for("right_rectification", &right_rectification)?;

        Ok(Self {
            image_size: None,
            left_rectification,
            right_rectification,
            left_projection,
            right_projection,
            disparity_to_depth
        })
    }

    /// Calibration for images that are already rectified.
    pub fn prerectified(disparity_to_depth: DisparityToDepth) -> Self {
        Self {
            image_size: None,
            left_rectification: Matrix3::identity(),
            right_rectification: Matrix3::identity(),
            left_projection: None,
            right_projection: None,
            disparity_to_depth
        }
    }

    /// Restrict the calibration to frames of the given size.
    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = Some((width, height));
        self
    }

    /// Load a calibration file. Any shape or value problem is reported as a calibration error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let context = path.display().to_string();

        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::calibration(&context, e.to_string()))?;
        let file: CalibrationFile = toml::from_str(&text)
            .map_err(|e| Error::calibration(&context, e.to_string()))?;

        let left = match &file.left_rectification {
            Some(rows) => Matrix3::from(matrix_from_rows::<3>("left_rectification", rows)?),
            None => Matrix3::identity()
        };
        let right = match &file.right_rectification {
            Some(rows) => Matrix3::from(matrix_from_rows::<3>("right_rectification", rows)?),
            None => Matrix3::identity()
        };
        let q = DisparityToDepth::from_rows(&file.disparity_to_depth)?;

        let mut calibration = Self::new(left, right, q)?;
        if let Some([width, height]) = file.image_size {
            calibration = calibration.with_image_size(width, height);
        }

        log::info!("Loaded stereo calibration from {}", context);
        Ok(calibration)
    }

    /// Save the calibration in the same format `load` reads.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = CalibrationFile {
            image_size: self.image_size.map(|(w, h)| [w, h]),
            left_rectification: Some(rows_of(&self.left_rectification)),
            right_rectification: Some(rows_of(&self.right_rectification)),
            disparity_to_depth: rows_of(self.disparity_to_depth.matrix())
        };
        let text = toml::to_string(&file).map_err(|e| Error::export(path, e))?;
        std::fs::write(path, text).map_err(|e| Error::export(path, e))
    }

    pub fn disparity_to_depth(&self) -> &DisparityToDepth {
        &self.disparity_to_depth
    }

    /// Warp a raw pair into the rectified geometry.
    pub fn rectify(&self, frame: &StereoFrame) -> Result<RectifiedPair> {
        if frame.left.dimensions() != frame.right.dimensions() {
            return Err(Error::capture(
                "stereo pair",
                format!(
                    "left is {:?} but right is {:?}",
                    frame.left.dimensions(), frame.right.dimensions()
                )
            ));
        }
        if let Some(size) = self.image_size {
            if frame.left.dimensions() != size {
                return Err(Error::calibration(
                    "image_size",
                    format!("calibrated for {:?}, frames are {:?}", size, frame.left.dimensions())
                ));
            }
        }

        Ok(RectifiedPair {
            left: apply_projection(&frame.left, self.left_projection.as_ref()),
            right: apply_projection(&frame.right, self.right_projection.as_ref())
        })
    }
}

impl RectifiedPair {
    pub fn dimensions(&self) -> (u32, u32) {
        self.left.dimensions()
    }

    /// Grayscale versions of both images, as consumed by the matchers.
    pub fn to_gray(&self) -> (GrayImage, GrayImage) {
        (image::imageops::grayscale(&self.left), image::imageops::grayscale(&self.right))
    }

    /// Write both images as portable pixmaps named `left.ppm` and `right.ppm`, creating the
    /// directory if needed.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| Error::export(dir, e))?;

        for (side, img) in [("left", &self.left), ("right", &self.right)] {
            let path = dir.join(format!("{}.ppm", side));
            img.save(&path).map_err(|e| Error::export(&path, e))?;
        }

        log::info!("Wrote rectified pair to {}", dir.display());
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn matrix_from_rows<const N: usize>(name: &str, rows: &[Vec<f64>]) -> Result<[[f64; N]; N]> {
    if rows.len() != N || rows.iter().any(|r| r.len() != N) {
        let shape: Vec<usize> = rows.iter().map(|r| r.len()).collect();
        return Err(Error::calibration(
            name,
            format!("expected a {}x{} matrix, got rows of lengths {:?}", N, N, shape)
        ));
    }

    // nalgebra's array conversion is column-major
    let mut columns = [[0.0; N]; N];
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            columns[c][r] = *value;
        }
    }
    Ok(columns)
}

fn rows_of<const N: usize>(
    matrix: &nalgebra::SMatrix<f64, N, N>
) -> Vec<Vec<f64>> {
    (0..N).map(|r| (0..N).map(|c| matrix[(r, c)]).collect()).collect()
}

fn projection_for(name: &str, homography: &Matrix3<f64>) -> Result<Option<Projection>> {
    if homography.iter().any(|v| !v.is_finite()) {
        return Err(Error::calibration(name, "contains non-finite entries"));
    }
    if *homography == Matrix3::identity() {
        return Ok(None);
    }

    let mut entries = [0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            entries[r * 3 + c] = homography[(r, c)] as f32;
        }
    }

    Projection::from_matrix(entries)
        .map(Some)
        .ok_or_else(|| Error::calibration(name, "homography is not invertible"))
}

fn apply_projection(img: &RgbImage, projection: Option<&Projection>) -> RgbImage {
    match projection {
        Some(p) => warp(img, p, Interpolation::Bilinear, Rgb([0, 0, 0])),
        None => img.clone()
    }
}
