//! # Block matching disparity computation
//!
//! This module provides a local correlation matcher: each pixel of the left image takes the
//! disparity whose square window in the right image has the smallest sum of absolute
//! differences. Images are prefiltered with a clipped horizontal Sobel response so that the
//! cost compares texture rather than raw brightness.
//!
//! The cost volume, region and sub-pixel helpers are shared with the semi-global matcher.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::ops::Range;

use image::GrayImage;
use imageproc::gradients::horizontal_sobel;
use serde::{Deserialize, Serialize};

use crate::calibration::RectifiedPair;
use crate::disparity::{find_spec, DisparityAlgorithm, DisparityMap, ParameterConstraint, ParameterSpec};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Per-pixel difference used where the shifted window leaves the right image.
const OUT_OF_IMAGE_COST: u32 = 255;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct BlockMatcher {
    params: Params
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Params {
    pub min_disparity: i32,
    pub num_disparities: u32,
    pub block_size: u32,
    pub pre_filter_cap: u32,
    pub texture_threshold: u32,
    pub uniqueness_ratio: u32
}

/// Matching costs for every pixel and every searched disparity, stored pixel-major.
pub(crate) struct CostVolume {
    pub width: usize,
    pub height: usize,
    pub num: usize,
    pub costs: Vec<u32>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            min_disparity: 0,
            num_disparities: 64,
            block_size: 15,
            pre_filter_cap: 31,
            texture_threshold: 10,
            uniqueness_ratio: 15
        }
    }
}

impl BlockMatcher {
    /// Create a new instance of the algorithm with the given parameters.
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Sum of the prefiltered texture magnitude over each pixel's window.
    fn texture(&self, filtered: &[i32], width: usize, height: usize, half: usize) -> Vec<u32> {
        let cap = self.params.pre_filter_cap as i32;
        let magnitude: Vec<u32> = filtered.iter().map(|v| (v - cap).unsigned_abs()).collect();
        box_sum(&magnitude, width, height, half)
    }
}

impl DisparityAlgorithm for BlockMatcher {
    /// Compute the disparity map for the given pair.
    fn compute(&mut self, pair: &RectifiedPair) -> Result<DisparityMap> {
        let (width, height) = pair.dimensions();
        let (width, height) = (width as usize, height as usize);
        let num = self.params.num_disparities as usize;
        let half = (self.params.block_size as usize - 1) / 2;
        let min_d = self.params.min_disparity;

        let mut disp_map = DisparityMap::new(width, height, min_d, self.params.num_disparities);

        // ---- PRE FILTER ----

        let (left, right) = pair.to_gray();
        let left = prefilter(&left, self.params.pre_filter_cap);
        let right = prefilter(&right, self.params.pre_filter_cap);

        // ---- STEREO CORRELATION ----

        let volume = sad_cost_volume(&left, &right, width, height, half, min_d, num);
        let texture = self.texture(&left, width, height, half);
        let (rows, cols) = valid_region(width, height, half, min_d, num);

        let mut rejected_texture = 0usize;
        for y in rows {
            for x in cols.clone() {
                if texture[y * width + x] < self.params.texture_threshold {
                    rejected_texture += 1;
                    continue;
                }

                if let Some(offset) = select_disparity(volume.at(x, y), self.params.uniqueness_ratio) {
                    disp_map.put(x, y, min_d as f32 + offset);
                }
            }
        }

        log::trace!("Block matcher rejected {} low texture pixels", rejected_texture);

        Ok(disp_map)
    }

    fn min_disparity(&self) -> i32 {
        self.params.min_disparity
    }

    fn num_disparities(&self) -> u32 {
        self.params.num_disparities
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        let p = &self.params;
        vec![
            ParameterSpec {
                name: "min_disparity",
                value: p.min_disparity,
                maximum: None,
                constraint: ParameterConstraint::Any
            },
            ParameterSpec {
                name: "num_disparities",
                value: p.num_disparities as i32,
                maximum: Some(256),
                constraint: ParameterConstraint::MultipleOf(16)
            },
            ParameterSpec {
                name: "block_size",
                value: p.block_size as i32,
                maximum: Some(255),
                constraint: ParameterConstraint::Odd
            },
            ParameterSpec {
                name: "pre_filter_cap",
                value: p.pre_filter_cap as i32,
                maximum: Some(63),
                constraint: ParameterConstraint::Any
            },
            ParameterSpec {
                name: "texture_threshold",
                value: p.texture_threshold as i32,
                maximum: Some(10_000),
                constraint: ParameterConstraint::Any
            },
            ParameterSpec {
                name: "uniqueness_ratio",
                value: p.uniqueness_ratio as i32,
                maximum: Some(100),
                constraint: ParameterConstraint::Any
            },
        ]
    }

    fn set_parameter(&mut self, name: &str, value: i32) -> Result<()> {
        let spec = find_spec(self.parameters(), name)?;
        spec.check(value, spec.maximum.unwrap_or(i32::MAX))?;

        match name {
            "min_disparity" => self.params.min_disparity = value,
            "num_disparities" => self.params.num_disparities = value as u32,
            "block_size" if value < 5 => {
                return Err(Error::invalid_parameter(name, "block size must be at least 5"));
            }
            "block_size" => self.params.block_size = value as u32,
            "pre_filter_cap" if value < 1 => {
                return Err(Error::invalid_parameter(name, "prefilter cap must be at least 1"));
            }
            "pre_filter_cap" => self.params.pre_filter_cap = value as u32,
            "texture_threshold" => self.params.texture_threshold = value as u32,
            _ => self.params.uniqueness_ratio = value as u32
        }
        Ok(())
    }
}

impl CostVolume {
    /// Costs of all searched disparities at one pixel.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> &[u32] {
        let start = (y * self.width + x) * self.num;
        &self.costs[start..start + self.num]
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Clipped horizontal Sobel response shifted into `[0, 2 * cap]`.
pub(crate) fn prefilter(img: &GrayImage, cap: u32) -> Vec<i32> {
    let cap = cap as i32;
    horizontal_sobel(img)
        .pixels()
        .map(|p| (p[0] as i32).clamp(-cap, cap) + cap)
        .collect()
}

/// Rows and columns where the matching window and every searched shift stay inside the image.
pub(crate) fn valid_region(
    width: usize,
    height: usize,
    half: usize,
    min_d: i32,
    num: usize
) -> (Range<usize>, Range<usize>) {
    let max_d = min_d + num as i32 - 1;
    let left_margin = half + max_d.max(0) as usize;
    let right_margin = half + (-min_d).max(0) as usize;

    let rows = if height > 2 * half { half..height - half } else { 0..0 };
    let cols = if width > left_margin + right_margin {
        left_margin..width - right_margin
    } else {
        0..0
    };
    (rows, cols)
}

/// Window sums of the absolute differences between the left image and the right image shifted
/// by each searched disparity.
pub(crate) fn sad_cost_volume(
    left: &[i32],
    right: &[i32],
    width: usize,
    height: usize,
    half: usize,
    min_d: i32,
    num: usize
) -> CostVolume {
    let mut costs = vec![0u32; width * height * num];
    let mut diff = vec![0u32; width * height];

    for k in 0..num {
        let d = min_d + k as i32;
        for y in 0..height {
            for x in 0..width {
                let xr = x as i32 - d;
                diff[y * width + x] = if xr >= 0 && (xr as usize) < width {
                    (left[y * width + x] - right[y * width + xr as usize]).unsigned_abs()
                } else {
                    OUT_OF_IMAGE_COST
                };
            }
        }

        let sums = box_sum(&diff, width, height, half);
        for (i, s) in sums.into_iter().enumerate() {
            costs[i * num + k] = s;
        }
    }

    CostVolume { width, height, num, costs }
}

/// Sum over the `(2 * half + 1)` square window around each pixel, clipped at the borders.
pub(crate) fn box_sum(values: &[u32], width: usize, height: usize, half: usize) -> Vec<u32> {
    // Summed area table with a zero row and column in front
    let stride = width + 1;
    let mut table = vec![0u64; stride * (height + 1)];
    for y in 0..height {
        let mut row = 0u64;
        for x in 0..width {
            row += values[y * width + x] as u64;
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
        }
    }

    let mut out = vec![0u32; width * height];
    for y in 0..height {
        let top = y.saturating_sub(half);
        let bottom = (y + half + 1).min(height);
        for x in 0..width {
            let left = x.saturating_sub(half);
            let right = (x + half + 1).min(width);
            let sum = table[bottom * stride + right] + table[top * stride + left]
                - table[top * stride + right]
                - table[bottom * stride + left];
            out[y * width + x] = sum.min(u32::MAX as u64) as u32;
        }
    }
    out
}

/// Pick the lowest cost disparity index, refined to sub-pixel precision.
///
/// Returns `None` when another disparity more than one step away scores within
/// `uniqueness_ratio` percent of the best one.
pub(crate) fn select_disparity(crits: &[u32], uniqueness_ratio: u32) -> Option<f32> {
    if crits.is_empty() {
        return None;
    }

    // Find index of minimum value
    let min_index = crits
        .iter()
        .enumerate()
        .fold(0, |min_idx, (idx, &val)| {
            if val < crits[min_idx] {
                idx
            }
            else {
                min_idx
            }
        });
    let best = crits[min_index] as u64;

    let ambiguous = crits.iter().enumerate().any(|(idx, &val)| {
        idx.abs_diff(min_index) > 1 && (val as u64) * 100 <= best * (100 + uniqueness_ratio as u64)
    });
    if ambiguous {
        return None;
    }

    // If on the outer edge of the criterion
    if min_index == 0 || min_index == crits.len() - 1 || crits.len() < 3 {
        return Some(min_index as f32);
    }

    // Get left and right values of the criterion
    let c = crits[min_index] as f32;
    let c_left = crits[min_index - 1] as f32;
    let c_right = crits[min_index + 1] as f32;

    // If left is higher than right
    let denom = match c_left > c_right {
        true => 2.0 * (c_left - c),
        false => 2.0 * (c_right - c)
    };

    if denom <= 0.0 {
        return Some(min_index as f32);
    }

    Some(min_index as f32 + (c_left - c_right) / denom)
}
