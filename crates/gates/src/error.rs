//! Error types for gate controllers and the gate panel.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Gate count must be between {min} and {max}, got {got}")]
    InvalidGateCount { got: usize, min: usize, max: usize },

    #[error("Auto-close delay must be 1-10s in 0.5s steps, got {0:?}")]
    InvalidAutoClose(Duration),

    #[error("Gate controllers require a Tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, Error>;
