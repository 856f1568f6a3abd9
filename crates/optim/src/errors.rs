use acqopt_space::{SpaceError, XType};
use thiserror::Error;

/// A result type for optimization errors
pub type Result<T> = std::result::Result<T, OptimError>;

/// An error for multistart optimization and optimizer pipelines
#[derive(Error, Debug)]
pub enum OptimError {
    /// When configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// When the gradient-box optimizer is used on non real-valued variables
    #[error("Gradient-box optimizer does not support mixed variable types: x{index} is {xtype:?}")]
    InvalidVariableType {
        /// Index of the first non real-valued variable
        index: usize,
        /// Type of this variable
        xtype: XType,
    },
    /// When a stage transfer produces a warm start the next optimizer cannot use
    #[error("Invalid warm start for {optimizer}: {reason}")]
    InvalidWarmStart {
        /// Name of the optimizer receiving the warm start
        optimizer: &'static str,
        /// Why it was rejected
        reason: String,
    },
    /// When an optimizer is used before being given an objective function
    #[error("{0} is not configured with an objective function")]
    NotConfigured(&'static str),
    /// When a pipeline is run without any stage
    #[error("Pipeline has no stage")]
    EmptyPipeline,
    /// When a halted pipeline is asked to continue
    #[error("Pipeline is halted")]
    PipelineHalted,
    /// When search space definition fails
    #[error(transparent)]
    SpaceError(#[from] SpaceError),
    /// When a linear algebra operation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
}
