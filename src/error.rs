//! Error types for matting and compositing operations

use thiserror::Error;

/// Result type alias for bgone operations
pub type Result<T> = std::result::Result<T, BgoneError>;

/// Error types for the matting pipeline
///
/// None of these are retried internally: each one stems from a structural
/// problem (missing model, model contract mismatch, bad input) rather than a
/// transient condition.
#[derive(Error, Debug)]
pub enum BgoneError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Inference runtime or model could not be loaded
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Decoding found no usable output buffers
    #[error("Model returned no usable outputs")]
    ModelOutputEmpty,

    /// Caller supplied input that violates a documented precondition
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// The runtime failed while executing the model
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgoneError {
    /// Create a new model unavailable error
    pub fn model_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a new precondition violation error
    pub fn precondition<S: Into<String>>(msg: S) -> Self {
        Self::PreconditionViolation(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create model error with the path that failed to load
    pub fn model_load_error<P: AsRef<std::path::Path>>(path: P, error: &str) -> Self {
        Self::ModelUnavailable(format!(
            "Failed to load model '{}': {}",
            path.as_ref().display(),
            error
        ))
    }

    /// Create configuration error with the valid range
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Whether the error originates from the model rather than the input
    #[must_use]
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable(_) | Self::ModelOutputEmpty | Self::Inference(_)
        )
    }
}
