//! # Stereo frames and frame sources
//!
//! This module provides the stereo frame container and the sources that deliver synchronized
//! left/right pairs to the pipeline. Camera drivers live outside this crate, they feed frames in
//! through a [`ChannelSource`] or write them to disk for a [`PairFolder`].

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, TryRecvError};
use image::{ImageBuffer, Luma, RgbImage};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Single channel floating point image, used for disparity data and matcher working buffers.
pub type GrayFloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A synchronized pair of colour images.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub left: RgbImage,
    pub left_timestamp: u64,
    pub right: RgbImage,
    pub right_timestamp: u64
}

/// Replays stereo pairs stored as `left*` / `right*` image files in a directory.
///
/// Files are paired by the suffix following the side name, so `left_003.png` pairs with
/// `right_003.png`, and pairs are served in sorted order.
pub struct PairFolder {
    folder: PathBuf,
    pairs: Vec<(PathBuf, PathBuf)>,
    next: usize,
    looping: bool
}

/// Receives frames pushed by a capture thread.
pub struct ChannelSource {
    device: String,
    frames: Receiver<StereoFrame>,
    released: bool
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait FrameSource {
    /// Human readable name of the device or location frames are read from.
    fn device(&self) -> &str;

    /// Get the next synchronized pair.
    ///
    /// `Ok(None)` means no pair is ready yet and the caller should poll again. An error means
    /// the device is gone and the session cannot continue.
    fn get_frame_pair(&mut self) -> Result<Option<StereoFrame>>;

    /// Release the underlying device. Called once when the owning session ends.
    fn release(&mut self) {}
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl StereoFrame {
    pub fn new(left: RgbImage, right: RgbImage) -> Self {
        Self {
            left,
            left_timestamp: 0,
            right,
            right_timestamp: 0
        }
    }

    pub fn width(&self) -> u32 {
        self.left.width()
    }

    pub fn height(&self) -> u32 {
        self.left.height()
    }
}

impl PairFolder {
    /// Discover stereo pairs in the given folder.
    pub fn open<P: AsRef<Path>>(folder: P) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        let device = folder.display().to_string();

        let entries = std::fs::read_dir(&folder)
            .map_err(|e| Error::capture(&device, e.to_string()))?;

        let mut lefts: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::capture(&device, e.to_string()))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with("left") {
                    lefts.push(name.to_owned());
                }
            }
        }
        lefts.sort();

        let mut pairs = Vec::with_capacity(lefts.len());
        for left in lefts {
            let right = format!("right{}", &left["left".len()..]);
            let right_path = folder.join(&right);
            if !right_path.is_file() {
                return Err(Error::capture(
                    &device,
                    format!("{} has no matching {}", left, right)
                ));
            }
            pairs.push((folder.join(&left), right_path));
        }

        if pairs.is_empty() {
            return Err(Error::capture(&device, "no left/right image pairs found"));
        }

        log::info!("Found {} stereo pairs in {}", pairs.len(), device);

        Ok(Self {
            folder,
            pairs,
            next: 0,
            looping: false
        })
    }

    /// Restart from the first pair once the folder is exhausted instead of failing.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn load(&self, path: &Path) -> Result<RgbImage> {
        image::open(path)
            .map(|img| img.to_rgb8())
            .map_err(|e| Error::capture(path.display().to_string(), e.to_string()))
    }
}

impl FrameSource for PairFolder {
    fn device(&self) -> &str {
        self.folder.to_str().unwrap_or("<image folder>")
    }

    fn get_frame_pair(&mut self) -> Result<Option<StereoFrame>> {
        if self.next >= self.pairs.len() {
            if !self.looping {
                return Err(Error::capture(self.device(), "no more image pairs"));
            }
            self.next = 0;
        }

        let index = self.next;
        self.next += 1;

        let (left_path, right_path) = &self.pairs[index];
        let left = self.load(left_path)?;
        let right = self.load(right_path)?;

        if left.dimensions() != right.dimensions() {
            return Err(Error::capture(
                self.device(),
                format!(
                    "{} is {:?} but {} is {:?}",
                    left_path.display(), left.dimensions(),
                    right_path.display(), right.dimensions()
                )
            ));
        }

        Ok(Some(StereoFrame {
            left,
            left_timestamp: index as u64,
            right,
            right_timestamp: index as u64
        }))
    }
}

impl ChannelSource {
    pub fn new(device: impl Into<String>, frames: Receiver<StereoFrame>) -> Self {
        Self {
            device: device.into(),
            frames,
            released: false
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for ChannelSource {
    fn device(&self) -> &str {
        &self.device
    }

    fn get_frame_pair(&mut self) -> Result<Option<StereoFrame>> {
        if self.released {
            return Err(Error::capture(&self.device, "source already released"));
        }

        match self.frames.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(Error::capture(&self.device, "capture thread disconnected"))
            }
        }
    }

    fn release(&mut self) {
        if !self.released {
            log::debug!("Releasing frame source {}", self.device);
            self.released = true;
        }
    }
}
