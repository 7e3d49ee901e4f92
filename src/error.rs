use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type returned by user supplied fetch, transform and consume hooks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The user hook an error or timeout originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Transform,
    Consume,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Fetch => f.write_str("fetch"),
            Operation::Transform => f.write_str("transform"),
            Operation::Consume => f.write_str("consume"),
        }
    }
}

/// Coarse classification of a [`PipelineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    Transform,
    Consume,
    Timeout,
    Config,
    Task,
}

/// Errors that can occur while running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The fetch function of a source failed
    #[error("fetch failed: {0}")]
    Fetch(#[source] BoxError),

    /// The transform function of a stage failed
    #[error("transform failed: {0}")]
    Transform(#[source] BoxError),

    /// The consume function of a sink failed
    #[error("consume failed: {0}")]
    Consume(#[source] BoxError),

    /// A transform or consume call did not settle in time
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: Operation, after: Duration },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A component or operation task panicked or was cancelled
    #[error("task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Wrap a hook error according to the operation that produced it
    pub(crate) fn from_operation(operation: Operation, error: BoxError) -> Self {
        match operation {
            Operation::Fetch => PipelineError::Fetch(error),
            Operation::Transform => PipelineError::Transform(error),
            Operation::Consume => PipelineError::Consume(error),
        }
    }

    /// Classify the error without inspecting its source
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Fetch(_) => ErrorKind::Fetch,
            PipelineError::Transform(_) => ErrorKind::Transform,
            PipelineError::Consume(_) => ErrorKind::Consume,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::Task(_) => ErrorKind::Task,
        }
    }

    /// Whether the error was caused by a slow dependency
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Task(err.to_string())
    }
}
