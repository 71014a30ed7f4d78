//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the stereo cloud crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause attached to errors raised by other crates (I/O, image codecs, TOML).
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The frame source could not deliver a pair. Fatal for the session.
    #[error("capture from {device} failed: {reason}")]
    Capture {
        device: String,
        reason: String
    },

    /// Calibration data is missing or malformed. Fatal before any frame is rendered.
    #[error("calibration {context} is malformed: {reason}")]
    Calibration {
        context: String,
        reason: String
    },

    /// A parameter lies outside the range the pipeline can work with.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: String,
        reason: String
    },

    /// Writing a point cloud, image or plot failed.
    #[error("export to {} failed", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: Cause
    },

    /// The settings file could not be read or written.
    #[error("settings file {} could not be processed", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: Cause
    },

    /// The tuner display could not be opened or updated.
    #[error("display {name} failed: {reason}")]
    Display {
        name: String,
        reason: String
    },

    /// A PLY stream did not match the vertex layout written by this crate.
    #[error("malformed PLY data: {0}")]
    MalformedPly(String)
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Error {
    pub(crate) fn capture(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Capture { device: device.into(), reason: reason.into() }
    }

    pub(crate) fn calibration(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Calibration { context: context.into(), reason: reason.into() }
    }

    pub(crate) fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidParameter { name: name.into(), reason: reason.into() }
    }

    pub(crate) fn export(path: impl Into<PathBuf>, source: impl Into<Cause>) -> Self {
        Error::Export { path: path.into(), source: source.into() }
    }

    pub(crate) fn settings(path: impl Into<PathBuf>, source: impl Into<Cause>) -> Self {
        Error::Settings { path: path.into(), source: source.into() }
    }

    #[cfg_attr(not(feature = "window"), allow(dead_code))]
    pub(crate) fn display(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Display { name: name.into(), reason: reason.into() }
    }

    /// Name of the pipeline stage the error belongs to, used when reporting to an operator.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Capture { .. } => "capture",
            Error::Calibration { .. } => "calibration",
            Error::InvalidParameter { .. } => "configuration",
            Error::Export { .. } => "export",
            Error::Settings { .. } => "settings",
            Error::Display { .. } => "display",
            Error::MalformedPly(_) => "point cloud read-back"
        }
    }
}
