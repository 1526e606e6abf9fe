//! Runner Error Types

use crate::engine::EngineError;
use crate::statement::StatementKind;
use std::io;
use thiserror::Error;

/// Errors surfaced by every entry point of the pipeline
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A script mixes schema and data statements
    #[error("Schema operations can't be mixed with data operations: expected {expected} statement, found {found}: {statement}")]
    MixedOperationKinds {
        expected: StatementKind,
        found: StatementKind,
        statement: String,
    },

    /// Fragment failed validation before any work started
    #[error("Invalid fragment: {0}")]
    Plan(EngineError),

    /// Engine failed while executing a statement or partition
    #[error(transparent)]
    Execution(#[from] EngineError),

    /// Cancellation token fired
    #[error("Execution cancelled: {reason}")]
    Cancelled { reason: String },

    /// A partition failed or could not be joined
    #[error("Error executing in parallel {fragment}: {source}")]
    Parallel {
        fragment: String,
        #[source]
        source: Box<RunnerError>,
    },

    /// Background producer failed; reported when the consumer next polls
    #[error("Background task failed: {source}")]
    BackgroundFailure {
        #[source]
        source: Box<RunnerError>,
    },

    /// Producer disappeared without pushing the terminator
    #[error("Relay closed before end of stream")]
    RelayClosed,

    /// Thread, pool or timer infrastructure is unavailable
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A worker or background thread panicked
    #[error("{task} panicked")]
    Panicked { task: String },

    /// Caller passed an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Script source could not be opened or read
    #[error("Error accessing file {location}: {source}")]
    Source {
        location: String,
        #[source]
        source: io::Error,
    },
}

impl RunnerError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            RunnerError::Cancelled { .. } => true,
            RunnerError::Parallel { source, .. } | RunnerError::BackgroundFailure { source } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }
}

impl RunnerError {
    pub(crate) fn spawn(task: &str, source: &std::io::Error) -> Self {
        RunnerError::Runtime(format!("failed to spawn {task} thread: {source}"))
    }

    pub(crate) fn panicked(task: &str) -> Self {
        RunnerError::Panicked {
            task: task.to_string(),
        }
    }
}

/// Result type for runner operations
pub type RunResult<T> = Result<T, RunnerError>;
