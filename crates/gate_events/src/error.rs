//! Reasons an inbound frame is rejected.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl NormalizeError {
    /// True when the frame was not a JSON object at all.
    pub fn is_malformed(&self) -> bool {
        matches!(self, NormalizeError::InvalidJson(_) | NormalizeError::NotAnObject)
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            NormalizeError::InvalidJson(_) | NormalizeError::NotAnObject => "malformed",
            NormalizeError::MissingField(_) => "missing_field",
        }
    }
}

pub type Result<T> = std::result::Result<T, NormalizeError>;
