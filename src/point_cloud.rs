//! # Point cloud reconstruction
//!
//! Reprojects a disparity map through the calibration's disparity-to-depth transform and keeps
//! the points that are both marked valid and finite.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::RgbImage;
use nalgebra::Point3;

use crate::calibration::DisparityToDepth;
use crate::disparity::DisparityMap;
use crate::error::*;
use crate::mask::ValidityMask;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Depth given to pixels without a disparity when missing values are handled.
pub const MISSING_DEPTH: f32 = 10_000.0;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A reconstructed scene point with the colour of the pixel it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub position: Point3<f32>,
    pub color: [u8; 3]
}

/// Points that survived validity and finiteness filtering, in row-major pixel order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Point3D>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Point3D {
    pub fn new(x: f32, y: f32, z: f32, color: [u8; 3]) -> Self {
        Self { position: Point3::new(x, y, z), color }
    }

    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|c| c.is_finite())
    }
}

impl PointCloud {
    pub fn from_points(points: Vec<Point3D>) -> Self {
        Self { points }
    }

    /// Reconstruct the scene seen by `disparity`.
    ///
    /// `colors` is the rectified image the disparity is aligned with (normally the left one) and
    /// `mask` the export validity mask. A point is kept if and only if the mask marks its pixel
    /// valid and all three of its coordinates are finite.
    pub fn from_disparity(
        disparity: &DisparityMap,
        transform: &DisparityToDepth,
        colors: &RgbImage,
        mask: &ValidityMask
    ) -> Result<Self> {
        let (width, height) = (disparity.width(), disparity.height());
        if colors.dimensions() != (width as u32, height as u32) {
            return Err(Error::invalid_parameter(
                "colors",
                format!("image is {:?} but disparity is {}x{}", colors.dimensions(), width, height)
            ));
        }
        if (mask.width(), mask.height()) != (width, height) {
            return Err(Error::invalid_parameter(
                "mask",
                format!("mask is {}x{} but disparity is {}x{}", mask.width(), mask.height(), width, height)
            ));
        }

        let coords = reproject(disparity, transform, true);

        let mut points = Vec::new();
        let mut non_finite = 0usize;
        for (i, xyz) in coords.iter().enumerate() {
            let (x, y) = (i % width, i / width);
            if !mask.get(x, y) {
                continue;
            }

            let point = Point3D::new(xyz[0], xyz[1], xyz[2], colors.get_pixel(x as u32, y as u32).0);
            if point.is_finite() {
                points.push(point);
            } else {
                non_finite += 1;
            }
        }

        log::debug!(
            "Reconstructed {} of {} pixels ({} masked-in points were not finite)",
            points.len(), coords.len(), non_finite
        );

        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3D] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point3D> {
        self.points.iter()
    }

    /// Drop points further than `max_depth` from the camera plane.
    pub fn retain_within_depth(&mut self, max_depth: f32) {
        self.points.retain(|p| p.position.z.abs() <= max_depth);
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point3D;
    type IntoIter = std::slice::Iter<'a, Point3D>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Reproject every pixel to scene coordinates, row-major.
///
/// With `handle_missing`, pixels holding the invalid fill value are placed at
/// [`MISSING_DEPTH`] instead of being reprojected with a meaningless disparity. Pixels whose
/// homogeneous weight is zero come out non-finite; nothing here fails per pixel.
pub fn reproject(
    disparity: &DisparityMap,
    transform: &DisparityToDepth,
    handle_missing: bool
) -> Vec<[f32; 3]> {
    let width = disparity.width();
    let missing = disparity.invalid_value() + f32::EPSILON;

    disparity
        .values()
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            let (x, y) = ((i % width) as f64, (i / width) as f64);
            let h = transform.apply(x, y, d as f64);
            let point = [(h.x / h.w) as f32, (h.y / h.w) as f32, (h.z / h.w) as f32];

            if handle_missing && d <= missing {
                [point[0], point[1], MISSING_DEPTH]
            } else {
                point
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pinhole() -> DisparityToDepth {
        DisparityToDepth::from_pinhole(100.0, 0.1, 1.0, 1.0).unwrap()
    }

    fn colors(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 200]))
    }

    #[test]
    fn reprojects_through_pinhole_transform() {
        let map = DisparityMap::from_vec(3, 3, 0, 16, vec![10.0; 9]).unwrap();
        let coords = reproject(&map, &pinhole(), false);

        // depth = f * b / d = 100 * 0.1 / 10
        let centre = coords[4];
        assert_relative_eq!(centre[2], 1.0, epsilon = 1e-6);
        assert_relative_eq!(centre[0], 0.0, epsilon = 1e-6);

        let corner = coords[0];
        assert_relative_eq!(corner[0], -0.01, epsilon = 1e-6);
        assert_relative_eq!(corner[1], -0.01, epsilon = 1e-6);
    }

    #[test]
    fn missing_pixels_get_sentinel_depth() {
        let map = DisparityMap::from_vec(2, 1, 0, 16, vec![-1.0, 5.0]).unwrap();
        let coords = reproject(&map, &pinhole(), true);
        assert_eq!(coords[0][2], MISSING_DEPTH);
        assert_relative_eq!(coords[1][2], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn keeps_only_valid_finite_points_in_pixel_order() {
        // Zero disparity has a zero homogeneous weight and reprojects to infinity
        let values = vec![0.0, 5.0, -1.0, 10.0];
        let map = DisparityMap::from_vec(2, 2, -1, 16, values).unwrap();
        let mask = ValidityMask::export(&map);
        assert!(mask.get(0, 0));

        let cloud = PointCloud::from_disparity(&map, &pinhole(), &colors(2, 2), &mask).unwrap();
        assert_eq!(cloud.len(), 2);
        assert!(cloud.iter().all(Point3D::is_finite));
        assert_eq!(cloud.points()[0].color, [1, 0, 200]);
        assert_eq!(cloud.points()[1].color, [1, 1, 200]);
    }

    #[test]
    fn all_invalid_gives_empty_cloud() {
        let map = DisparityMap::new(4, 3, 2, 16);
        let mask = ValidityMask::export(&map);
        let cloud = PointCloud::from_disparity(&map, &pinhole(), &colors(4, 3), &mask).unwrap();
        assert!(cloud.is_empty());
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let map = DisparityMap::new(4, 3, 0, 16);
        let mask = ValidityMask::export(&map);
        let err = PointCloud::from_disparity(&map, &pinhole(), &colors(3, 3), &mask).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn depth_limit_drops_far_points() {
        let mut cloud = PointCloud::from_points(vec![
            Point3D::new(0.0, 0.0, 1.0, [0, 0, 0]),
            Point3D::new(0.0, 0.0, 50.0, [0, 0, 0]),
        ]);
        cloud.retain_within_depth(10.0);
        assert_eq!(cloud.len(), 1);
    }
}
