//! Error types for the spatial analysis crate

use sw_core::SwError;
use thiserror::Error;

/// Spatial analysis error types
#[derive(Error, Debug)]
pub enum SpatialError {
    /// Axis layout not usable (wrong rank, wrong ear-axis size, clashing axes)
    #[error("Invalid axis: {0}")]
    InvalidAxis(String),

    /// Array shapes that do not fit together
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Parameter outside its valid range
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Error from the shared DSP layer
    #[error(transparent)]
    Dsp(#[from] SwError),
}

/// Result type for spatial operations
pub type SpatialResult<T> = Result<T, SpatialError>;
