use thiserror::Error;

/// Main error type for the trading engine
///
/// Risk breaches are deliberately absent: they are in-band business
/// conditions routed through the risk manager, never errors.
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown parameter group: {0}")]
    UnknownParamGroup(String),

    // Training errors
    #[error("Experience buffer is empty, nothing to update")]
    EmptyBuffer,

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    // Input validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient data: need {required} bars, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the error came from caller input rather than configuration.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::InsufficientData { .. }
                | EngineError::ShapeMismatch { .. }
        )
    }

    /// Whether the error came from configuration or trainer misuse.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::Config(_)
                | EngineError::InvalidConfiguration(_)
                | EngineError::UnknownParamGroup(_)
                | EngineError::EmptyBuffer
        )
    }
}

impl From<rayon::ThreadPoolBuildError> for EngineError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        EngineError::WorkerPool(err.to_string())
    }
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(EngineError::Validation("bad".into()).is_validation());
        assert!(EngineError::InsufficientData {
            required: 300,
            available: 10
        }
        .is_validation());
        assert!(EngineError::EmptyBuffer.is_configuration());
        assert!(EngineError::UnknownParamGroup("x".into()).is_configuration());
        assert!(!EngineError::Cancelled.is_validation());
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::InsufficientData {
            required: 300,
            available: 120,
        };
        assert_eq!(err.to_string(), "Insufficient data: need 300 bars, got 120");
    }
}
