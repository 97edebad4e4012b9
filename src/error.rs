//! Error types for telemetry arbitration.
//!
//! Almost none of these reach consumers: telemetry accessors resolve failures
//! to neutral defaults, the detection loop treats failures as "game not
//! found", and the outline cache treats them as cache misses. The variants
//! exist so the layers underneath can log precisely what went wrong, and so
//! the retry loops can tell a sim that is merely absent from one that will
//! never work.
//!
//! ```rust
//! use paddock::TelemetryError;
//!
//! let error = TelemetryError::connection_failed("rFactor 2 shared memory not mapped");
//! assert!(error.is_retryable());
//! println!("{error} ({})", error.recovery_hint());
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[cfg(windows)]
use windows_core as core;

/// Result type alias for telemetry operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("Failed to connect to telemetry source: {reason}")]
    Connection { reason: String },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SDK version mismatch: expected {expected}, found {found}")]
    Version { expected: u32, found: u32 },

    #[error("Read past the end of a buffer at offset {offset:#x}")]
    Memory { offset: usize },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("{task} did not stop within {duration:?}")]
    Timeout { task: String, duration: Duration },

    #[error("Variable '{field}' not present in the frame")]
    FieldNotFound { field: String },

    #[error("Type conversion error: {details}")]
    TypeConversion { details: String },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("Windows API error: {operation}")]
    #[cfg(windows)]
    WindowsApi {
        operation: String,
        #[source]
        source: core::Error,
    },

    #[error("Buffer read failed: {context}")]
    Buffer { context: String, buffer_index: Option<usize> },

    #[error("Outline cache error for track {track_id}: {details}")]
    Cache { track_id: i32, details: String },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("Process probe failed: {reason}")]
    ProcessProbe { reason: String },
}

impl TelemetryError {
    /// Whether trying the same thing again later can succeed. The reconnect
    /// and detection loops keep quiet about retryable failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } | Self::Buffer { .. } | Self::ProcessProbe { .. } => true,
            #[cfg(windows)]
            Self::WindowsApi { .. } => true,
            _ => false,
        }
    }

    /// One line telling the user what to check, for log output.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "start the simulator and join a session",
            Self::File { .. } => "check the cache directory exists and is writable",
            Self::Version { .. } => "update the simulator or this library",
            Self::Memory { .. } | Self::Buffer { .. } => "the shared memory layout changed; restart the simulator",
            Self::Parse { .. } => "the session document is malformed; it is retried on the next update",
            Self::Timeout { .. } => "the task is still running detached; raise the stop timeout",
            Self::FieldNotFound { .. } | Self::TypeConversion { .. } => {
                "the variable is not published by this simulator"
            }
            Self::UnsupportedPlatform { .. } => "live sources need Windows; demo mode still works",
            #[cfg(windows)]
            Self::WindowsApi { .. } => "check the simulator runs as the same user",
            Self::Cache { .. } => "delete the cached outline so it is captured again",
            Self::Config { .. } => "fix or remove the offending configuration key",
            Self::ProcessProbe { .. } => "check the process list is readable by this user",
        }
    }

    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        Self::File { path, source }
    }

    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::Connection { reason: reason.into() }
    }

    pub fn memory_access_error(offset: usize) -> Self {
        Self::Memory { offset }
    }

    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Parse { context: context.into(), details: details.into() }
    }

    pub fn timeout(task: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout { task: task.into(), duration }
    }

    #[cfg(windows)]
    pub fn windows_api_error(operation: impl Into<String>, source: core::Error) -> Self {
        Self::WindowsApi { operation: operation.into(), source }
    }

    pub fn buffer_operation_error(context: impl Into<String>, buffer_index: Option<usize>) -> Self {
        Self::Buffer { context: context.into(), buffer_index }
    }

    pub fn cache_error(track_id: i32, details: impl Into<String>) -> Self {
        Self::Cache { track_id, details: details.into() }
    }

    pub fn config_error(details: impl Into<String>) -> Self {
        Self::Config { details: details.into() }
    }

    pub fn process_probe_failed(reason: impl Into<String>) -> Self {
        Self::ProcessProbe { reason: reason.into() }
    }

    pub fn unsupported_platform(feature: impl Into<String>, required_platform: impl Into<String>) -> Self {
        Self::UnsupportedPlatform { feature: feature.into(), required_platform: required_platform.into() }
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        Self::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

#[cfg(windows)]
impl From<core::Error> for TelemetryError {
    fn from(err: core::Error) -> Self {
        Self::WindowsApi { operation: "Unknown Windows operation".to_string(), source: err }
    }
}
