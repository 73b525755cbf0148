//! Error types for the conversion pipeline.

use chrono::NaiveDate;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by the pipeline stages. None of them are retried: they
/// propagate to the command layer and terminate the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The start date is after the end date, or the path template is unusable.
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    /// The input object does not exist.
    #[error("Input not found: {0}")]
    Missing(String),

    /// Any other failure reading an input object.
    #[error("Failed to fetch {path}: {reason}")]
    Fetch { path: String, reason: String },

    /// The bytes are not a readable NetCDF or parquet file.
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    /// The NetCDF file does not have the expected dimensions or variables.
    #[error("Unexpected layout in {path}: {reason}")]
    Schema { path: String, reason: String },

    /// The output location cannot be written.
    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

impl PipelineError {
    pub fn invalid_range(start: NaiveDate, end: NaiveDate) -> Self {
        PipelineError::InvalidRange(format!("start {} is after end {}", start, end))
    }

    pub fn fetch(path: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Fetch {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(path: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(path: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Schema {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write(path: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, PipelineError::Missing(_))
    }
}

// -- Tests -------------------------------------------------------------------
