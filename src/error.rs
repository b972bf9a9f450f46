//! Error types for the recorder

use std::path::PathBuf;
use thiserror::Error;

use crate::audio::device::DeviceId;
use crate::engine::ActivityKind;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Mode error: {0}")]
    Mode(#[from] ModeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open {device}: {reason}")]
    DeviceOpen { device: DeviceId, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to start stream: {0}")]
    StreamError(String),

    #[error("Stream on {device} failed: {reason}")]
    StreamFailure { device: DeviceId, reason: String },

    #[error("Buffer is attached to a running stream")]
    BufferBusy,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Capture engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0} is already active")]
    AlreadyActive(ActivityKind),

    #[error("{0} is running, cannot change its configuration")]
    Busy(ActivityKind),

    #[error("No devices given for {0}")]
    NoDevices(ActivityKind),

    #[error("{kind} could not open {device}: {source}")]
    DeviceOpen {
        kind: ActivityKind,
        device: DeviceId,
        #[source]
        source: AudioError,
    },
}

/// Per-device export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Cannot create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("Export worker has shut down")]
    WorkerGone,
}

/// Mode controller errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModeError {
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No working input device selected: {}", format_failures(.failures))]
    NoWorkingDevices { failures: Vec<(DeviceId, String)> },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Export worker has shut down")]
    ExportUnavailable,
}

fn format_failures(failures: &[(DeviceId, String)]) -> String {
    failures
        .iter()
        .map(|(device, reason)| format!("{} ({})", device, reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
