use thiserror::Error;

/// Shared lightweight error type for core primitive validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid caller input or malformed descriptor value.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}
