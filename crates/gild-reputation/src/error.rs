use gild_types::ErrorKind;
use thiserror::Error;

/// Reputation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReputationError {
    /// Rating outside the 1..=5 scale
    #[error("Rating out of scale: {0} (expected 1..=5)")]
    RatingOutOfScale(u8),

    /// NaN/infinite/out-of-range numeric input to the calculator
    #[error("Malformed numeric input: {0}")]
    MalformedInput(String),

    /// Decay configured with a non-positive half-life
    #[error("Invalid half-life: {0} days")]
    InvalidHalfLife(f64),
}

impl ReputationError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PreconditionViolation
    }

    /// Stable machine-readable reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            ReputationError::RatingOutOfScale(_) => "rating_out_of_scale",
            ReputationError::MalformedInput(_) => "malformed_input",
            ReputationError::InvalidHalfLife(_) => "invalid_half_life",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReputationError>;
