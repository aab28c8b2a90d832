use thiserror::Error;

/// Errors raised by the training pipeline.
///
/// Configuration errors are detected before any gradient step. Numerical
/// degeneracy (zero advantage variance, fully masked heads) is handled with
/// epsilon terms and never surfaces here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Minibatch layout mismatch: minibatch_size ({minibatch_size}) * num_minibatches \
         ({num_minibatches}) must equal rollout_length ({rollout_length}) * num_envs ({num_envs})"
    )]
    MinibatchMismatch {
        minibatch_size: usize,
        num_minibatches: usize,
        rollout_length: usize,
        num_envs: usize,
    },

    #[error("Unsupported action-space mode: {0}")]
    UnsupportedActionMode(String),

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Trajectory is incomplete: expected {expected} transitions, holds {actual}")]
    IncompleteTrajectory { expected: usize, actual: usize },

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Model error: {0}")]
    Model(String),
}

impl TrainError {
    /// Shorthand for a [`TrainError::ShapeMismatch`].
    pub fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        TrainError::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrainError>;
