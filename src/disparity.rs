//! # General disparity objects
//!
//! This module provides generic disparity traits and structures for use by different algorithms.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::Luma;
use serde::{Deserialize, Serialize};

use crate::block_matching::{BlockMatcher, Params as BlockParams};
use crate::calibration::RectifiedPair;
use crate::error::*;
use crate::frame::GrayFloatImage;
use crate::semi_global::{Params as SemiGlobalParams, SemiGlobalMatcher};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A floating point disparity map carrying the search range it was computed with.
///
/// Pixels without a match hold [`DisparityMap::invalid_value`], one below the minimum disparity.
#[derive(Debug, Clone)]
pub struct DisparityMap {
    data: GrayFloatImage,
    min_disparity: i32,
    num_disparities: u32
}

/// Description of one tunable matcher parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub value: i32,
    /// Largest accepted value. `None` means bounded by the shortest image dimension.
    pub maximum: Option<i32>,
    pub constraint: ParameterConstraint
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Restriction on the values a parameter may take, and the mapping between the values and the
/// positions of a slider (or key presses) used to tune them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterConstraint {
    /// Any integer in range.
    Any,
    /// Only odd values, e.g. window sizes with a centre pixel.
    Odd,
    /// Only positive multiples of the step, e.g. disparity counts in multiples of 16.
    MultipleOf(i32)
}

/// Selects which disparity engine a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    /// Fast local correlation matcher.
    BlockMatching,
    /// Semi-global matcher, slower but smoother.
    #[default]
    SemiGlobal
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait DisparityAlgorithm {
    /// Compute the disparity map of the given rectified pair.
    fn compute(&mut self, pair: &RectifiedPair) -> Result<DisparityMap>;

    /// Smallest disparity searched.
    fn min_disparity(&self) -> i32;

    /// Number of disparities searched, starting at `min_disparity`.
    fn num_disparities(&self) -> u32;

    /// All tunable parameters with their current values.
    fn parameters(&self) -> Vec<ParameterSpec>;

    /// Set a named parameter, rejecting values outside its declared range or constraint.
    fn set_parameter(&mut self, name: &str, value: i32) -> Result<()>;

    /// Current value of a named parameter.
    fn parameter(&self, name: &str) -> Option<i32> {
        self.parameters().into_iter().find(|p| p.name == name).map(|p| p.value)
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        self.parameters().into_iter().map(|p| p.name).collect()
    }
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityMap {
    /// Create a map where every pixel is marked as having no match.
    pub fn new(width: usize, height: usize, min_disparity: i32, num_disparities: u32) -> Self {
        let invalid = (min_disparity - 1) as f32;
        DisparityMap {
            data: GrayFloatImage::from_pixel(width as u32, height as u32, Luma([invalid])),
            min_disparity,
            num_disparities
        }
    }

    /// Wrap row-major values.
    pub fn from_vec(
        width: usize,
        height: usize,
        min_disparity: i32,
        num_disparities: u32,
        values: Vec<f32>
    ) -> Result<Self> {
        let expected = width * height;
        let len = values.len();
        let data = GrayFloatImage::from_raw(width as u32, height as u32, values)
            .ok_or_else(|| Error::invalid_parameter(
                "disparity",
                format!("{} values do not fill a {}x{} map ({})", len, width, height, expected)
            ))?;

        Ok(DisparityMap {
            data,
            min_disparity,
            num_disparities
        })
    }

    pub fn width(&self) -> usize {
        self.data.width() as usize
    }

    pub fn height(&self) -> usize {
        self.data.height() as usize
    }

    pub fn len(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min_disparity(&self) -> i32 {
        self.min_disparity
    }

    pub fn num_disparities(&self) -> u32 {
        self.num_disparities
    }

    /// Value written where the matcher found no correspondence.
    pub fn invalid_value(&self) -> f32 {
        (self.min_disparity - 1) as f32
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data.get_pixel(x as u32, y as u32)[0]
    }

    #[inline]
    pub fn put(&mut self, x: usize, y: usize, val: f32) {
        self.data.put_pixel(x as u32, y as u32, Luma([val]))
    }

    /// Row-major view of the raw values.
    pub fn values(&self) -> &[f32] {
        self.data.as_raw()
    }
}

impl ParameterSpec {
    /// Maximum once unbounded parameters are resolved against the image size.
    pub fn resolved_maximum(&self, shortest_dimension: u32) -> i32 {
        self.maximum.unwrap_or(shortest_dimension as i32)
    }

    /// Check a candidate value against the range `[0, maximum]` and the constraint.
    pub fn check(&self, value: i32, maximum: i32) -> Result<()> {
        if value < 0 || value > maximum {
            return Err(Error::invalid_parameter(
                self.name,
                format!("{} is outside 0..={}", value, maximum)
            ));
        }
        self.constraint.check(self.name, value)
    }

    /// The value one step above or below the current one, or `None` at the range limits.
    pub fn step(&self, direction: i32, maximum: i32) -> Option<i32> {
        let position = self.constraint.slider_value(self.value) + direction.signum();
        if position < 0 || position > self.constraint.slider_max(maximum) {
            return None;
        }
        let value = self.constraint.actual_value(position);
        self.check(value, maximum).ok().map(|_| value)
    }
}

impl ParameterConstraint {
    pub fn check(&self, name: &str, value: i32) -> Result<()> {
        match *self {
            ParameterConstraint::Any => Ok(()),
            ParameterConstraint::Odd if value % 2 == 1 => Ok(()),
            ParameterConstraint::Odd => {
                Err(Error::invalid_parameter(name, format!("{} is not odd", value)))
            }
            ParameterConstraint::MultipleOf(step) if value > 0 && value % step == 0 => Ok(()),
            ParameterConstraint::MultipleOf(step) => Err(Error::invalid_parameter(
                name,
                format!("{} is not a positive multiple of {}", value, step)
            ))
        }
    }

    /// Slider position for an actual value.
    pub fn slider_value(&self, value: i32) -> i32 {
        match *self {
            ParameterConstraint::Any => value,
            ParameterConstraint::Odd => (value - 1) / 2,
            ParameterConstraint::MultipleOf(step) => value / step
        }
    }

    /// Actual value for a slider position.
    pub fn actual_value(&self, position: i32) -> i32 {
        match *self {
            ParameterConstraint::Any => position,
            ParameterConstraint::Odd => position * 2 + 1,
            ParameterConstraint::MultipleOf(step) => position * step
        }
    }

    /// Highest slider position whose value stays within `maximum`.
    pub fn slider_max(&self, maximum: i32) -> i32 {
        match *self {
            ParameterConstraint::Any => maximum,
            ParameterConstraint::Odd => (maximum - 1) / 2,
            ParameterConstraint::MultipleOf(step) => maximum / step
        }
    }
}

impl MatcherKind {
    /// Build the matcher with its default parameters.
    pub fn build(self) -> Box<dyn DisparityAlgorithm> {
        match self {
            MatcherKind::BlockMatching => Box::new(BlockMatcher::new(BlockParams::default())),
            MatcherKind::SemiGlobal => Box::new(SemiGlobalMatcher::new(SemiGlobalParams::default()))
        }
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Look up a parameter by name in a matcher's declared list, failing on unknown names.
pub(crate) fn find_spec(specs: Vec<ParameterSpec>, name: &str) -> Result<ParameterSpec> {
    specs
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| Error::invalid_parameter(name, "no such parameter"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_map_is_all_invalid() {
        let map = DisparityMap::new(3, 2, 4, 16);
        assert!(map.values().iter().all(|&v| v == 3.0));
        assert_eq!(map.invalid_value(), 3.0);
    }

    #[test]
    fn from_vec_keeps_row_major_order() {
        let map = DisparityMap::from_vec(2, 2, 0, 16, vec![-1.0, 3.5, 7.0, -1.0]).unwrap();
        assert_eq!(map.get(1, 0), 3.5);
        assert_eq!(map.get(0, 1), 7.0);
        assert_eq!(map.values().len(), map.len());
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(DisparityMap::from_vec(2, 2, 0, 16, vec![0.0; 3]).is_err());
    }

    #[test]
    fn constraints_map_slider_positions() {
        assert_eq!(ParameterConstraint::Odd.actual_value(2), 5);
        assert_eq!(ParameterConstraint::Odd.slider_value(5), 2);
        assert_eq!(ParameterConstraint::MultipleOf(16).actual_value(3), 48);
        assert_eq!(ParameterConstraint::MultipleOf(16).slider_max(100), 6);
        assert!(ParameterConstraint::Odd.check("block_size", 4).is_err());
        assert!(ParameterConstraint::MultipleOf(16).check("num_disparities", 0).is_err());
    }

    #[test]
    fn stepping_respects_maximum() {
        let spec = ParameterSpec {
            name: "num_disparities",
            value: 96,
            maximum: Some(112),
            constraint: ParameterConstraint::MultipleOf(16)
        };
        assert_eq!(spec.step(1, 112), Some(112));
        assert_eq!(spec.step(-1, 112), Some(80));

        let top = ParameterSpec { value: 112, ..spec };
        assert_eq!(top.step(1, 112), None);
    }
}
