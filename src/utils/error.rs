//! Error types and handling
//!
//! Common error types used across the capture engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::recorder::state::CaptureStatus;

/// Capture-wide error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: CaptureStatus,
    },

    #[error("song name is required")]
    EmptySongName,

    #[error("duplicate audio sources detected ({}) - close the conflicting applications", .0.join(", "))]
    DuplicateSources(Vec<String>),

    #[error("port not found: {0}")]
    PortNotFound(String),

    #[error("timed out after {waited:?} waiting for port: {port}")]
    PortTimeout { port: String, waited: Duration },

    #[error("failed to connect {source_port} to {dest_port} after {attempts} attempts")]
    ConnectFailed {
        source_port: String,
        dest_port: String,
        attempts: u32,
    },

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Encoder start failed: {0}")]
    EncoderStart(String),

    #[error("Encoder stop failed: {0}")]
    EncoderStop(String),

    #[error("recording file not found: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("recording failed: file too small ({size} bytes): {}", .path.display())]
    OutputTooSmall { path: PathBuf, size: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Broad failure classes, used to decide how the state machine reacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or wrong state; nothing changed
    Validation,
    /// Missing or duplicated ports; monitoring may self-heal
    Source,
    /// Encoder start/stop/output failures; terminal for the session
    Subprocess,
    /// Filesystem and configuration problems
    Setup,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::InvalidState { .. } | CaptureError::EmptySongName => ErrorKind::Validation,
            CaptureError::DuplicateSources(_)
            | CaptureError::PortNotFound(_)
            | CaptureError::PortTimeout { .. }
            | CaptureError::ConnectFailed { .. }
            | CaptureError::Routing(_) => ErrorKind::Source,
            CaptureError::EncoderStart(_)
            | CaptureError::EncoderStop(_)
            | CaptureError::OutputMissing(_)
            | CaptureError::OutputTooSmall { .. } => ErrorKind::Subprocess,
            CaptureError::Config(_) | CaptureError::Io(_) | CaptureError::Toml(_) => ErrorKind::Setup,
        }
    }
}

/// Error response for the web UI
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<CaptureError> for ErrorResponse {
    fn from(error: CaptureError) -> Self {
        let code = match &error {
            CaptureError::InvalidState { .. } => "INVALID_STATE",
            CaptureError::EmptySongName => "EMPTY_SONG_NAME",
            CaptureError::DuplicateSources(_) => "DUPLICATE_SOURCES",
            CaptureError::PortNotFound(_) => "PORT_NOT_FOUND",
            CaptureError::PortTimeout { .. } => "PORT_TIMEOUT",
            CaptureError::ConnectFailed { .. } => "CONNECT_FAILED",
            CaptureError::Routing(_) => "ROUTING_ERROR",
            CaptureError::EncoderStart(_) => "ENCODER_START_FAILED",
            CaptureError::EncoderStop(_) => "ENCODER_STOP_FAILED",
            CaptureError::OutputMissing(_) => "OUTPUT_MISSING",
            CaptureError::OutputTooSmall { .. } => "OUTPUT_TOO_SMALL",
            CaptureError::Config(_) | CaptureError::Toml(_) => "CONFIG_ERROR",
            CaptureError::Io(_) => "IO_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(CaptureError::EmptySongName.kind(), ErrorKind::Validation);
        assert_eq!(
            CaptureError::DuplicateSources(vec!["a:1".into()]).kind(),
            ErrorKind::Source
        );
        assert_eq!(
            CaptureError::OutputTooSmall {
                path: PathBuf::from("x.mkv"),
                size: 12
            }
            .kind(),
            ErrorKind::Subprocess
        );
    }

    #[test]
    fn test_error_response_code() {
        let response = ErrorResponse::from(CaptureError::InvalidState {
            operation: "stop",
            status: CaptureStatus::Standby,
        });
        assert_eq!(response.code, "INVALID_STATE");
        assert_eq!(response.message, "cannot stop while STANDBY");
    }

    #[test]
    fn test_duplicate_message_lists_ports() {
        let err = CaptureError::DuplicateSources(vec!["a:1".into(), "b:2".into()]);
        assert!(err.to_string().contains("a:1, b:2"));
    }
}
