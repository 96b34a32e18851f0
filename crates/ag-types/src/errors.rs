use thiserror::Error;

/// Main error type for the Augur system
#[derive(Error, Debug)]
pub enum AgError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Study cancelled: {study}")]
    Cancelled { study: String },

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgError {
    /// True when the search was stopped by a cancellation hook.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// True for errors raised while validating a study configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Plugin-related errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin not found: {category}.{name}")]
    NotFound { category: String, name: String },

    #[error("Plugin {name} does not support {operation}")]
    Unsupported { name: String, operation: String },

    #[error("Plugin {name} used before fit")]
    NotFitted { name: String },

    #[error("Plugin {name} failed to fit: {message}")]
    FitFailed { name: String, message: String },

    #[error("Invalid hyperparameter for {name}: {parameter}, message: {message}")]
    InvalidParameter {
        name: String,
        parameter: String,
        message: String,
    },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

/// Trial-related errors
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("No trial of {shape} produced a usable score")]
    NoUsableScore { shape: String },
}

/// Result type alias for Augur operations
pub type AgResult<T> = Result<T, AgError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::errors::AgError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::errors::AgError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::errors::AgError::Config(format!($($arg)*))
    };
}
