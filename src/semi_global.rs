//! # Semi-global disparity computation
//!
//! This module provides a semi-global matcher. Window SAD costs are aggregated along four
//! scanline directions, each path adding a small penalty `p1` for disparity changes of one
//! step and a large penalty `p2` for larger jumps, which favours piecewise smooth surfaces.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::block_matching::{prefilter, sad_cost_volume, select_disparity, valid_region, CostVolume};
use crate::calibration::RectifiedPair;
use crate::disparity::{find_spec, DisparityAlgorithm, DisparityMap, ParameterConstraint, ParameterSpec};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Aggregation directions as `(dx, dy)` steps from the previous pixel on the path.
const PATHS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct SemiGlobalMatcher {
    params: Params
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Params {
    pub min_disparity: i32,
    pub num_disparities: u32,
    pub block_size: u32,
    pub p1: u32,
    pub p2: u32,
    pub pre_filter_cap: u32,
    pub uniqueness_ratio: u32
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            min_disparity: 0,
            num_disparities: 64,
            block_size: 5,
            p1: 200,
            p2: 800,
            pre_filter_cap: 63,
            uniqueness_ratio: 10
        }
    }
}

impl SemiGlobalMatcher {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

impl DisparityAlgorithm for SemiGlobalMatcher {
    fn compute(&mut self, pair: &RectifiedPair) -> Result<DisparityMap> {
        let (width, height) = pair.dimensions();
        let (width, height) = (width as usize, height as usize);
        let num = self.params.num_disparities as usize;
        let half = (self.params.block_size as usize - 1) / 2;
        let min_d = self.params.min_disparity;

        let mut disp_map = DisparityMap::new(width, height, min_d, self.params.num_disparities);

        let (left, right) = pair.to_gray();
        let left = prefilter(&left, self.params.pre_filter_cap);
        let right = prefilter(&right, self.params.pre_filter_cap);

        let volume = sad_cost_volume(&left, &right, width, height, half, min_d, num);

        let mut total = vec![0u32; volume.costs.len()];
        for (dx, dy) in PATHS {
            aggregate_path(&volume, dx, dy, self.params.p1, self.params.p2, &mut total);
        }

        let (rows, cols) = valid_region(width, height, half, min_d, num);
        for y in rows {
            for x in cols.clone() {
                let start = (y * width + x) * num;
                if let Some(offset) = select_disparity(&total[start..start + num], self.params.uniqueness_ratio) {
                    disp_map.put(x, y, min_d as f32 + offset);
                }
            }
        }

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
                maximum: Some(11),
                constraint: ParameterConstraint::Odd
            },
            ParameterSpec {
                name: "p1",
                value: p.p1 as i32,
                maximum: Some(10_000),
                constraint: ParameterConstraint::Any
            },
            ParameterSpec {
                name: "p2",
                value: p.p2 as i32,
                maximum: Some(40_000),
                constraint: ParameterConstraint::Any
            },
            ParameterSpec {
                name: "pre_filter_cap",
                value: p.pre_filter_cap as i32,
                maximum: Some(63),
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
            "block_size" => self.params.block_size = value as u32,
            "p1" if value as u32 >= self.params.p2 => {
                return Err(Error::invalid_parameter(name, "p1 must stay below p2"));
            }
            "p1" => self.params.p1 = value as u32,
            "p2" if value as u32 <= self.params.p1 => {
                return Err(Error::invalid_parameter(name, "p2 must stay above p1"));
            }
            "p2" => self.params.p2 = value as u32,
            "pre_filter_cap" if value < 1 => {
                return Err(Error::invalid_parameter(name, "prefilter cap must be at least 1"));
            }
            "pre_filter_cap" => self.params.pre_filter_cap = value as u32,
            _ => self.params.uniqueness_ratio = value as u32
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Aggregate costs along every path with direction `(dx, dy)` and add them into `total`.
fn aggregate_path(volume: &CostVolume, dx: i32, dy: i32, p1: u32, p2: u32, total: &mut [u32]) {
    let (width, height, num) = (volume.width, volume.height, volume.num);

    // Visit pixels so the previous pixel on the path is always done first
    let xs: Vec<usize> = if dx < 0 { (0..width).rev().collect() } else { (0..width).collect() };
    let ys: Vec<usize> = if dy < 0 { (0..height).rev().collect() } else { (0..height).collect() };

    // Path costs of the previous pixel for horizontal paths, or of the previous row for
    // vertical paths
    let mut previous = vec![0u32; if dy == 0 { num } else { width * num }];
    let mut current = vec![0u32; num];

    for (row_idx, &y) in ys.iter().enumerate() {
        for (col_idx, &x) in xs.iter().enumerate() {
            let first_on_path = if dy == 0 { col_idx == 0 } else { row_idx == 0 };
            let prev_slot = if dy == 0 { 0 } else { x * num };

            let cost = volume.at(x, y);
            if first_on_path {
                current.copy_from_slice(cost);
            } else {
                path_step(cost, &previous[prev_slot..prev_slot + num], p1, p2, &mut current);
            }

            let start = (y * width + x) * num;
            for (t, c) in total[start..start + num].iter_mut().zip(current.iter()) {
                *t = t.saturating_add(*c);
            }
            previous[prev_slot..prev_slot + num].copy_from_slice(&current);
        }
    }
}

/// One step of the path recurrence
/// `L(p, d) = C(p, d) + min(L(q, d), L(q, d ± 1) + p1, min L(q) + p2) - min L(q)`.
fn path_step(cost: &[u32], prev: &[u32], p1: u32, p2: u32, out: &mut [u32]) {
    let min_prev = prev.iter().copied().min().unwrap_or(0);
    let jump = min_prev.saturating_add(p2);

    for d in 0..cost.len() {
        let mut best = prev[d].min(jump);
        if d > 0 {
            best = best.min(prev[d - 1].saturating_add(p1));
        }
        if d + 1 < prev.len() {
            best = best.min(prev[d + 1].saturating_add(p1));
        }
        out[d] = cost[d].saturating_add(best - min_prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::shifted_pair;

    #[test]
    fn path_step_penalises_jumps() {
        let prev = [0, 100, 100, 100];
        let cost = [10, 10, 10, 10];
        let mut out = [0u32; 4];
        path_step(&cost, &prev, 5, 50, &mut out);
        assert_eq!(out, [10, 15, 60, 60]);
    }

    #[test]
    fn recovers_constant_shift() {
        let pair = shifted_pair(64, 24, 5);
        let mut matcher = SemiGlobalMatcher::new(Params {
            num_disparities: 16,
            uniqueness_ratio: 0,
            ..Params::default()
        });

        let map = matcher.compute(&pair).unwrap();
        let (rows, cols) = valid_region(64, 24, 2, 0, 16);
        let mut matched = 0;
        for y in rows {
            for x in cols.clone() {
                let d = map.get(x, y);
                if d > map.invalid_value() {
                    matched += 1;
                    assert!((d - 5.0).abs() < 0.75, "disparity {} at ({}, {})", d, x, y);
                }
            }
        }
        assert!(matched > 0);
    }

    #[test]
    fn penalties_stay_ordered() {
        let mut matcher = SemiGlobalMatcher::new(Params::default());
        assert!(matcher.set_parameter("p1", 900).is_err());
        assert!(matcher.set_parameter("p2", 150).is_err());
        assert!(matcher.set_parameter("p2", 1200).is_ok());
        assert!(matcher.set_parameter("p1", 900).is_ok());
        assert!(matcher.set_parameter("block_size", 13).is_err());
    }
}
