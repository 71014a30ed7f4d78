//! # On-screen tuner frontend
//!
//! Shows the display image in a `minifb` window and turns key presses into tuner events:
//!
//! | Key                   | Event              |
//! |-----------------------|--------------------|
//! | `Esc`, `Q`            | cancel             |
//! | `Space`, `Enter`, `C` | capture and export |
//! | `Tab`                 | select next        |
//! | `Up`, `Right`         | step up            |
//! | `Down`, `Left`        | step down          |
//!
//! Closing the window cancels the session.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::time::{Duration, Instant};

use image::RgbImage;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

use crate::error::*;
use crate::frontend::{Frontend, TunerEvent};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct WindowFrontend {
    title: String,
    window: Option<Window>,
    buffer: Vec<u32>,
    size: (usize, usize)
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl WindowFrontend {
    /// The window is opened on the first frame, once its size is known.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            window: None,
            buffer: Vec::new(),
            size: (0, 0)
        }
    }

    fn open(&mut self, width: usize, height: usize) -> Result<()> {
        let mut window = Window::new(&self.title, width, height, WindowOptions::default())
            .map_err(|e| Error::display(&self.title, e.to_string()))?;
        window.limit_update_rate(Some(Duration::from_micros(16600)));

        self.window = Some(window);
        self.size = (width, height);
        Ok(())
    }

    fn key_event(key: Key) -> Option<TunerEvent> {
        match key {
            Key::Escape | Key::Q => Some(TunerEvent::Cancelled),
            Key::Space | Key::Enter | Key::C => Some(TunerEvent::CaptureRequested),
            Key::Tab => Some(TunerEvent::SelectNext),
            Key::Up | Key::Right => Some(TunerEvent::Step(1)),
            Key::Down | Key::Left => Some(TunerEvent::Step(-1)),
            _ => None
        }
    }
}

impl Frontend for WindowFrontend {
    fn show(&mut self, image: &RgbImage) -> Result<()> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        if self.window.is_none() || self.size != (width, height) {
            self.open(width, height)?;
        }

        self.buffer.clear();
        self.buffer.extend(
            image
                .pixels()
                .map(|p| (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32)
        );

        if let Some(window) = self.window.as_mut() {
            window
                .update_with_buffer(&self.buffer, width, height)
                .map_err(|e| Error::display(&self.title, e.to_string()))?;
        }
        Ok(())
    }

    fn wait_event(&mut self, timeout: Duration) -> Result<Option<TunerEvent>> {
        let window = match self.window.as_mut() {
            Some(window) => window,
            None => {
                std::thread::sleep(timeout);
                return Ok(None);
            }
        };

        let deadline = Instant::now() + timeout;
        loop {
            if !window.is_open() {
                return Ok(Some(TunerEvent::Cancelled));
            }
            if let Some(event) = window
                .get_keys_pressed(KeyRepeat::Yes)
                .into_iter()
                .find_map(Self::key_event)
            {
                return Ok(Some(event));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            window.update();
        }
    }

    fn release(&mut self) {
        if self.window.take().is_some() {
            log::debug!("Closed window {}", self.title);
        }
    }
}
