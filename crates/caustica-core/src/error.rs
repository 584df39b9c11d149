//! Error types for Caustica

use thiserror::Error;

/// Result type alias using Caustica's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Caustica operations
///
/// Numerical conditions the drivers recover from (rasterization misses,
/// Poisson residuals) are reported as return values, not as errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Export failed
    #[error("Export failed: {0}")]
    Export(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding/decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
