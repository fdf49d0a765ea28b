//! Error types for the stereo widener

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum SwError {
    /// Audio is not stereo after shape normalisation
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Misconfigured array axes (ear/time axes of binaural signals)
    #[error("Invalid axis: {0}")]
    InvalidAxis(String),

    /// Unknown decorrelation or filterbank type
    #[error("Not implemented: {0}")]
    Unsupported(String),

    #[error("Failed to load resource {path}: {source}")]
    ResourceLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Caller violated a numerical precondition
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwError {
    /// Shorthand for the "input must be stereo" shape error
    pub fn not_stereo(got: usize) -> Self {
        Self::InvalidShape(format!("input signal must be stereo, got {got} channels"))
    }
}

/// Result type alias
pub type SwResult<T> = Result<T, SwError>;
