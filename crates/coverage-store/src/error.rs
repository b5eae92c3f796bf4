//! Error types for the coverage store.

use raster_common::RasterError;
use thiserror::Error;

/// Errors that can occur while managing or reading coverages.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQL prepare/exec/step failure.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Pixel, palette, statistics or tile value error.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// The caller passed arguments that can never succeed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No registry row for the coverage.
    #[error("coverage not found: {0}")]
    CoverageNotFound(String),

    /// A coverage with this name (case-insensitive) is already registered.
    #[error("coverage already exists: {0}")]
    CoverageExists(String),

    /// The section id does not exist in the coverage.
    #[error("section {section_id} not found in coverage {coverage}")]
    SectionNotFound { coverage: String, section_id: i64 },

    /// No stored level matches the requested resolution.
    #[error("no pyramid level matches resolution {x_res} x {y_res}")]
    ResolutionNotFound { x_res: f64, y_res: f64 },

    /// A stored tile could not be decoded.
    #[error("failed to decode tile {tile_id}: {reason}")]
    Decode { tile_id: i64, reason: String },

    /// Stored or supplied data violates a coverage rule.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Buffer allocation or worker pool creation failed.
    #[error("resource error: {0}")]
    Resource(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a Validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a Resource error.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn section_not_found(coverage: impl Into<String>, section_id: i64) -> Self {
        Self::SectionNotFound {
            coverage: coverage.into(),
            section_id,
        }
    }

    /// Tri-state outcome reported at the SQL-facing boundary.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::InvalidArgument(_) => Outcome::InvalidArguments,
            _ => Outcome::Failure,
        }
    }
}

/// Result of an operation as seen by SQL callers: 1, 0 or -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    InvalidArguments,
}

impl Outcome {
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 1,
            Self::Failure => 0,
            Self::InvalidArguments => -1,
        }
    }

    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.outcome(),
        }
    }
}

/// Result type for coverage store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes() {
        let ok: Result<()> = Ok(());
        assert_eq!(Outcome::from_result(&ok).code(), 1);

        let bad: Result<()> = Err(StoreError::invalid_argument("negative resolution"));
        assert_eq!(Outcome::from_result(&bad).code(), -1);

        let failed: Result<()> = Err(StoreError::CoverageNotFound("dem".into()));
        assert_eq!(Outcome::from_result(&failed).code(), 0);
    }
}
