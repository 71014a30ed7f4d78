//! # Disparity validity masks
//!
//! A validity mask marks the pixels whose disparity can be trusted. Two thresholds exist and
//! must not be unified:
//!
//! - the display path keeps everything above `min_disparity - 1`, so a pixel sitting exactly on
//!   the disparity floor is still drawn;
//! - the export path keeps only values above `min_disparity`, dropping floor pixels whose depth
//!   is geometrically unreliable.
//!
//! Both compare against the threshold plus `f32::EPSILON` so that the matcher's invalid fill
//! value is excluded exactly.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use crate::disparity::DisparityMap;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    width: usize,
    height: usize,
    data: Vec<bool>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl ValidityMask {
    /// Mask used before colour mapping for on-screen display.
    pub fn display(disparity: &DisparityMap) -> Self {
        Self::above(disparity, disparity.min_disparity() as f32 - 1.0)
    }

    /// Mask used when reprojecting to a point cloud.
    pub fn export(disparity: &DisparityMap) -> Self {
        Self::above(disparity, disparity.min_disparity() as f32)
    }

    fn above(disparity: &DisparityMap, floor: f32) -> Self {
        let threshold = floor + f32::EPSILON;
        Self {
            width: disparity.width(),
            height: disparity.height(),
            data: disparity.values().iter().map(|&d| d > threshold).collect()
        }
    }

    /// A mask with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: bool) -> Self {
        Self { width, height, data: vec![value; width * height] }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value;
    }

    /// Row-major flags.
    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Keep only pixels valid in both masks.
    pub fn intersect(&mut self, other: &ValidityMask) {
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a = *a && *b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(min: i32, values: Vec<f32>) -> DisparityMap {
        let n = values.len();
        DisparityMap::from_vec(n, 1, min, 16, values).unwrap()
    }

    #[test]
    fn sentinel_is_invalid_everywhere() {
        let d = map(4, vec![3.0, 2.0, -100.0]);
        assert_eq!(ValidityMask::display(&d).count_valid(), 0);
        assert_eq!(ValidityMask::export(&d).count_valid(), 0);
    }

    #[test]
    fn floor_pixels_are_display_only() {
        let d = map(4, vec![4.0]);
        assert!(ValidityMask::display(&d).get(0, 0));
        assert!(!ValidityMask::export(&d).get(0, 0));
    }

    #[test]
    fn export_implies_display() {
        let values: Vec<f32> = (0..200).map(|i| -2.0 + i as f32 * 0.05).collect();
        let d = map(2, values);
        let display = ValidityMask::display(&d);
        let export = ValidityMask::export(&d);

        for (e, s) in export.as_slice().iter().zip(display.as_slice()) {
            assert!(!e || *s);
        }
        assert!(export.count_valid() < display.count_valid());
    }

    #[test]
    fn near_floor_values_are_kept() {
        let d = map(0, vec![0.001, -0.5]);
        let export = ValidityMask::export(&d);
        assert!(export.get(0, 0));
        assert!(ValidityMask::display(&d).get(1, 0));
        assert!(!export.get(1, 0));
    }

    #[test]
    fn intersect_keeps_common_pixels() {
        let mut a = ValidityMask::filled(2, 1, true);
        let mut b = ValidityMask::filled(2, 1, true);
        b.set(1, 0, false);
        a.intersect(&b);
        assert_eq!(a.as_slice(), &[true, false]);
        assert_eq!(a.count_valid(), 1);
    }
}
