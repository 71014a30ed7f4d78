//! # Tuner frontends
//!
//! A frontend shows the tuner's display image and is the tuner's only suspension point: it
//! blocks until a user event arrives or a timer tick elapses. The headless frontend takes its
//! events from a channel, fed from stdin commands by the command line tool.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use image::RgbImage;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// User input understood by the tuner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunerEvent {
    /// Set a named parameter to an exact value.
    ParameterChanged { name: String, value: i32 },
    /// Move the parameter selection used by `Step`.
    SelectNext,
    /// Step the selected parameter up (positive) or down (negative) by one constraint step.
    Step(i32),
    CaptureRequested,
    Cancelled
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait Frontend {
    /// Present the latest display image.
    fn show(&mut self, image: &RgbImage) -> Result<()>;

    /// Block until an event arrives or `timeout` elapses. `Ok(None)` is a plain timer tick.
    fn wait_event(&mut self, timeout: Duration) -> Result<Option<TunerEvent>>;

    /// Close the display. Called once when the owning session ends.
    fn release(&mut self) {}
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Frontend without a window: events come from a channel and the display image is optionally
/// written to a file every cycle.
pub struct HeadlessFrontend {
    events: Receiver<TunerEvent>,
    preview: Option<PathBuf>,
    released: bool
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl FromStr for TunerEvent {
    type Err = String;

    /// Parse a text command: `set <name> <value>`, `next`, `up`, `down`, `capture` or `quit`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        match words.as_slice() {
            ["set", name, value] => value
                .parse()
                .map(|value| TunerEvent::ParameterChanged { name: name.to_string(), value })
                .map_err(|e| format!("bad value {:?}: {}", value, e)),
            ["next"] | ["tab"] => Ok(TunerEvent::SelectNext),
            ["up"] | ["+"] => Ok(TunerEvent::Step(1)),
            ["down"] | ["-"] => Ok(TunerEvent::Step(-1)),
            ["capture"] | ["c"] => Ok(TunerEvent::CaptureRequested),
            ["quit"] | ["q"] | ["exit"] => Ok(TunerEvent::Cancelled),
            _ => Err(format!("unknown command {:?}", s.trim()))
        }
    }
}

impl HeadlessFrontend {
    pub fn new(events: Receiver<TunerEvent>) -> Self {
        Self {
            events,
            preview: None,
            released: false
        }
    }

    /// Write every displayed image to this path.
    pub fn with_preview(mut self, path: impl Into<PathBuf>) -> Self {
        self.preview = Some(path.into());
        self
    }
}

impl Frontend for HeadlessFrontend {
    fn show(&mut self, image: &RgbImage) -> Result<()> {
        if let Some(path) = &self.preview {
            image.save(path).map_err(|e| Error::export(path, e))?;
        }
        Ok(())
    }

    fn wait_event(&mut self, timeout: Duration) -> Result<Option<TunerEvent>> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // Nobody can send events any more, so nobody can end the session either
            Err(RecvTimeoutError::Disconnected) => Ok(Some(TunerEvent::Cancelled))
        }
    }

    fn release(&mut self) {
        if !self.released {
            log::debug!("Closing headless frontend");
            self.released = true;
        }
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Read tuner commands from a reader on a background thread.
///
/// The channel disconnects when the reader reaches end of input.
pub fn spawn_command_reader<R: BufRead + Send + 'static>(reader: R) -> Receiver<TunerEvent> {
    let (tx, rx) = crossbeam_channel::unbounded();

    std::thread::spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("Stopped reading commands: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<TunerEvent>() {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("{}", e)
            }
        }
    });

    rx
}
