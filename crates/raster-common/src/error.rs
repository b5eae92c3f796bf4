//! Error types for the raster value model.

use thiserror::Error;

/// Errors raised while building, encoding or decoding raster values.
#[derive(Error, Debug)]
pub enum RasterError {
    /// A sample/pixel/band combination that no coverage may declare.
    #[error("invalid pixel format: {0}")]
    InvalidFormat(String),

    /// A value that does not fit the declared sample type.
    #[error("invalid sample value: {0}")]
    InvalidSample(String),

    /// A band index outside the pixel's band range.
    #[error("band index {index} out of range for {bands} band(s)")]
    BandOutOfRange { index: usize, bands: usize },

    /// Buffer length does not match the declared geometry.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    /// Palette related failure.
    #[error("invalid palette: {0}")]
    InvalidPalette(String),

    /// A serialized BLOB could not be decoded.
    #[error("malformed {kind} blob: {reason}")]
    MalformedBlob { kind: &'static str, reason: String },

    /// Two values that must agree (pixel vs raster, odd vs even) do not.
    #[error("format mismatch: {0}")]
    Mismatch(String),

    /// The requested codec cannot handle this pixel layout.
    #[error("unsupported compression {compression} for {layout}")]
    UnsupportedCompression { compression: String, layout: String },

    /// Payload compression/decompression failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl RasterError {
    /// Create an InvalidFormat error.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create an InvalidSample error.
    pub fn invalid_sample(msg: impl Into<String>) -> Self {
        Self::InvalidSample(msg.into())
    }

    /// Create a MalformedBlob error.
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedBlob {
            kind,
            reason: reason.into(),
        }
    }

    /// Create a Mismatch error.
    pub fn mismatch(msg: impl Into<String>) -> Self {
        Self::Mismatch(msg.into())
    }

    /// Create a Codec error.
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
}

impl From<std::io::Error> for RasterError {
    fn from(err: std::io::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<image::ImageError> for RasterError {
    fn from(err: image::ImageError) -> Self {
        Self::Codec(format!("PNG: {}", err))
    }
}

/// Result type for raster model operations.
pub type Result<T> = std::result::Result<T, RasterError>;
