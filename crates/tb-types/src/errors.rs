use thiserror::Error;

use crate::status::TaskStatus;

/// Main error type for the task buffet
#[derive(Error, Debug)]
pub enum BuffetError {
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        /// Rendering of the grid found in the persisted buffet, when the
        /// error comes from a grid mismatch.
        saved: Option<String>,
        /// Rendering of the grid requested by the caller.
        requested: Option<String>,
    },

    #[error("Merge error: {message}")]
    Merge { message: String },

    #[error("Uninitialized grid: {message}")]
    UninitializedGrid { message: String },

    #[error("Invalid task status returned: {value}")]
    Status { value: String },

    #[error("Task execution failed: {message}")]
    TaskExecution { message: String },

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Lock error on {path}: {message}")]
    Lock { path: String, message: String },

    #[error("Buffet decoding error: {message}")]
    Codec { message: String },

    #[error("Task index {index} out of range for a buffet of {len} tasks")]
    TaskIndexOutOfRange { index: usize, len: usize },

    #[error("Launcher error: {message}")]
    Launcher { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Parameter grid construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("Got {names} parameter names but {sequences} value sequences")]
    ArityMismatch { names: usize, sequences: usize },

    #[error("Parameter {name} has {actual} values, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate parameter name: {name}")]
    DuplicateName { name: String },

    #[error("A grid needs at least one parameter")]
    Empty,

    #[error("Parameter {name} has a NaN or infinite value")]
    NonFinite { name: String },
}

impl BuffetError {
    /// Configuration error without grid diagnostics.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            saved: None,
            requested: None,
        }
    }

    /// Status error for an outcome outside the allowed set.
    pub fn invalid_status(status: TaskStatus) -> Self {
        Self::Status {
            value: status.to_string(),
        }
    }

    /// True for the errors a fail-soft worker downgrades to a failed task.
    pub fn is_task_failure(&self) -> bool {
        matches!(self, Self::TaskExecution { .. } | Self::Status { .. })
    }
}

/// Result type alias for task buffet operations
pub type BuffetResult<T> = Result<T, BuffetError>;

/// Macro for creating task execution errors
#[macro_export]
macro_rules! task_error {
    ($($arg:tt)*) => {
        $crate::BuffetError::TaskExecution { message: format!($($arg)*) }
    };
}

/// Macro for creating merge errors
#[macro_export]
macro_rules! merge_error {
    ($($arg:tt)*) => {
        $crate::BuffetError::Merge { message: format!($($arg)*) }
    };
}
