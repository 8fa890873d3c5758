//! Error types for the tuner engine.
//!
//! Every failure that can cross the engine boundary is one of these variants.
//! Per-cycle detection misses are not errors; they surface as a 0 Hz reading.

use thiserror::Error;

/// Main error type for the tuner engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine parameters have not been set")]
    NotConfigured,

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Permission to use the input device was denied: {0}")]
    PermissionDenied(String),

    #[error("Audio capture failed: {0}")]
    CaptureFailure(String),

    #[error("Thread error: {0}")]
    Thread(String),
}

/// Result type alias for the tuner engine
pub type Result<T> = std::result::Result<T, EngineError>;
