//! Error types for the tuner core.
//!
//! Only conditions the caller has to act on are errors. A frame in which no
//! pitch was found is a normal outcome and is reported through a zero
//! confidence on the estimate instead.

use thiserror::Error;

/// Pitch estimation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PitchError {
    /// Frame shorter than the configured frame size; skip this cycle.
    #[error("Insufficient data: {got} samples, need at least {need}")]
    InsufficientData { got: usize, need: usize },

    /// Sample rate of zero
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid note name: {0}")]
    InvalidNote(String),
}

/// Result type for pitch operations
pub type PitchResult<T> = Result<T, PitchError>;
