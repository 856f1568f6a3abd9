use thiserror::Error;

/// A result type for search space errors
pub type Result<T> = std::result::Result<T, SpaceError>;

/// An error raised when building a search space
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    /// When a variable type definition is invalid
    #[error("Invalid variable type: {0}")]
    InvalidXType(String),
    /// When variable names do not match the variables
    #[error("Invalid variable names: {0}")]
    InvalidNames(String),
    /// When a bounds matrix is ill-formed
    #[error("Invalid limits: {0}")]
    InvalidLimits(String),
}
