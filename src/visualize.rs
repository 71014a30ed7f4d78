//! # Disparity visualisation
//!
//! Colour maps disparity maps for display: values are normalised over the searched range,
//! passed through a jet palette and masked with the display validity mask.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{imageops, Rgb, RgbImage};

use crate::disparity::DisparityMap;
use crate::error::*;
use crate::mask::ValidityMask;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Colour mapped disparity image, black where no disparity was found.
pub type ColorDisparity = RgbImage;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Position of a disparity on the 0-255 palette ramp.
///
/// `min_disparity` maps to 0 and `min_disparity + num_disparities - 1` to 255, values outside
/// clamp. Fails for `num_disparities <= 1`, which has no range to normalise over.
pub fn normalize(value: f32, min_disparity: i32, num_disparities: u32) -> Result<u8> {
    let range = checked_range(num_disparities)?;
    Ok(ramp(value, min_disparity, range))
}

#[inline]
fn ramp(value: f32, min_disparity: i32, range: f32) -> u8 {
    ((value - min_disparity as f32) * 255.0 / range).clamp(0.0, 255.0) as u8
}

fn checked_range(num_disparities: u32) -> Result<f32> {
    if num_disparities <= 1 {
        return Err(Error::invalid_parameter(
            "num_disparities",
            format!("{} leaves no disparity range to normalise", num_disparities)
        ));
    }
    Ok((num_disparities - 1) as f32)
}

/// Jet palette: dark blue at 0, through cyan, green and yellow, to dark red at 255.
pub fn jet(position: u8) -> Rgb<u8> {
    let t = position as f32 / 255.0;
    let channel = |centre: f32| -> u8 {
        ((1.5 - (4.0 * t - centre).abs()).clamp(0.0, 1.0) * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Colour map a disparity map using its own search range and display mask.
pub fn visualize(disparity: &DisparityMap) -> Result<ColorDisparity> {
    let mask = ValidityMask::display(disparity);
    visualize_with(disparity, disparity.min_disparity(), disparity.num_disparities(), &mask)
}

/// Colour map a disparity map with an explicit range and mask.
pub fn visualize_with(
    disparity: &DisparityMap,
    min_disparity: i32,
    num_disparities: u32,
    mask: &ValidityMask
) -> Result<ColorDisparity> {
    let range = checked_range(num_disparities)?;
    if (mask.width(), mask.height()) != (disparity.width(), disparity.height()) {
        return Err(Error::invalid_parameter(
            "mask",
            format!(
                "mask is {}x{} but disparity is {}x{}",
                mask.width(), mask.height(), disparity.width(), disparity.height()
            )
        ));
    }

    let palette: Vec<Rgb<u8>> = (0..=255u8).map(jet).collect();

    Ok(RgbImage::from_fn(disparity.width() as u32, disparity.height() as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if mask.get(x, y) {
            palette[ramp(disparity.get(x, y), min_disparity, range) as usize]
        } else {
            Rgb([0, 0, 0])
        }
    }))
}

/// Lay images out side by side, top aligned, padding with black.
pub fn concat_horizontal(images: &[&RgbImage]) -> RgbImage {
    let width = images.iter().map(|i| i.width()).sum();
    let height = images.iter().map(|i| i.height()).max().unwrap_or(0);
    let mut out = RgbImage::new(width, height);

    let mut x = 0;
    for img in images {
        imageops::replace(&mut out, *img, x as i64, 0);
        x += img.width();
    }
    out
}

/// Stack images vertically, left aligned, padding with black.
pub fn concat_vertical(images: &[&RgbImage]) -> RgbImage {
    let width = images.iter().map(|i| i.width()).max().unwrap_or(0);
    let height = images.iter().map(|i| i.height()).sum();
    let mut out = RgbImage::new(width, height);

    let mut y = 0;
    for img in images {
        imageops::replace(&mut out, *img, 0, y as i64);
        y += img.height();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_ends_hit_palette_ends() {
        assert_eq!(normalize(3.0, 3, 10).unwrap(), 0);
        assert_eq!(normalize(12.0, 3, 10).unwrap(), 255);
        assert_eq!(normalize(-50.0, 3, 10).unwrap(), 0);
        assert_eq!(normalize(500.0, 3, 10).unwrap(), 255);
    }

    #[test]
    fn degenerate_range_is_rejected() {
        for n in [0, 1] {
            assert!(matches!(normalize(1.0, 0, n), Err(Error::InvalidParameter { .. })));
            let map = DisparityMap::new(2, 2, 0, n);
            assert!(matches!(visualize(&map), Err(Error::InvalidParameter { .. })));
        }
    }

    #[test]
    fn jet_runs_blue_to_red() {
        let low = jet(0);
        let mid = jet(128);
        let high = jet(255);
        assert!(low[2] > 100 && low[0] == 0 && low[1] == 0);
        assert!(mid[1] == 255);
        assert!(high[0] > 100 && high[1] == 0 && high[2] == 0);
    }

    #[test]
    fn two_by_two_scene() {
        let min = 4;
        let values = vec![
            (min - 1) as f32, (min + 5) as f32,
            (min + 2) as f32, (min - 1) as f32,
        ];
        let map = DisparityMap::from_vec(2, 2, min, 10, values).unwrap();
        let img = visualize(&map).unwrap();

        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(1, 1), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(1, 0), &jet(141));
        assert_eq!(img.get_pixel(0, 1), &jet(56));
        assert_ne!(img.get_pixel(1, 0), &Rgb([0, 0, 0]));
        assert_ne!(img.get_pixel(0, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn floor_pixel_is_drawn_at_ramp_start() {
        let map = DisparityMap::from_vec(1, 1, 2, 16, vec![2.0]).unwrap();
        assert_eq!(visualize(&map).unwrap().get_pixel(0, 0), &jet(0));
    }

    #[test]
    fn concat_pads_smaller_images() {
        let a = RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]));
        let b = RgbImage::from_pixel(1, 1, Rgb([7, 7, 7]));
        let h = concat_horizontal(&[&a, &b]);
        assert_eq!(h.dimensions(), (3, 2));
        assert_eq!(h.get_pixel(2, 0), &Rgb([7, 7, 7]));
        assert_eq!(h.get_pixel(2, 1), &Rgb([0, 0, 0]));

        let v = concat_vertical(&[&a, &b]);
        assert_eq!(v.dimensions(), (2, 3));
        assert_eq!(v.get_pixel(0, 2), &Rgb([7, 7, 7]));
    }

    #[test]
    fn concat_places_every_input_at_its_offset() {
        let a = RgbImage::from_pixel(2, 1, Rgb([1, 1, 1]));
        let b = RgbImage::from_pixel(3, 2, Rgb([2, 2, 2]));
        let c = RgbImage::from_pixel(1, 1, Rgb([3, 3, 3]));

        let h = concat_horizontal(&[&a, &b, &c]);
        assert_eq!(h.dimensions(), (6, 2));
        assert_eq!(h.get_pixel(1, 0), &Rgb([1, 1, 1]));
        assert_eq!(h.get_pixel(4, 1), &Rgb([2, 2, 2]));
        assert_eq!(h.get_pixel(5, 0), &Rgb([3, 3, 3]));
        assert_eq!(h.get_pixel(5, 1), &Rgb([0, 0, 0]));

        let v = concat_vertical(&[&a, &b, &c]);
        assert_eq!(v.dimensions(), (3, 4));
        assert_eq!(v.get_pixel(1, 0), &Rgb([1, 1, 1]));
        assert_eq!(v.get_pixel(2, 2), &Rgb([2, 2, 2]));
        assert_eq!(v.get_pixel(0, 3), &Rgb([3, 3, 3]));
        assert_eq!(v.get_pixel(2, 0), &Rgb([0, 0, 0]));
    }
}
