//! Engine Collaborators
//!
//! The pipeline never parses or plans statements itself. It drives three
//! external collaborators through the traits below:
//!
//! - [`Engine`]: validates (`explain`) and executes statement text
//! - [`TransactionManager`]: begins transactions
//! - [`Transaction`]: commit / rollback / forced termination
//!
//! Implementations must be `Send + Sync`: the same engine is shared by the
//! caller thread, the producer threads and the worker pool.

use crate::error::{RunResult, RunnerError};
use crate::value::{Params, QueryStatistics, Row};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Errors reported by the engine or transaction collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Statement failed to parse or plan
    #[error("Plan error: {0}")]
    Plan(String),

    /// Statement failed while executing
    #[error("Execution error [{code}]: {message}")]
    Execution { code: String, message: String },

    /// The owning transaction was marked for forced termination
    #[error("Transaction terminated: {0}")]
    Terminated(String),

    /// Transaction could not be started or finished
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl EngineError {
    pub fn execution(code: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Execution {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Rows of one executed statement.
///
/// Once the iterator is exhausted, `statistics()` reports the structural
/// changes the statement made.
pub trait RowStream: Iterator<Item = Result<Row, EngineError>> + Send {
    fn statistics(&self) -> QueryStatistics;
}

/// Query execution engine
pub trait Engine: Send + Sync {
    /// Parse and plan `fragment` without executing it.
    fn explain(&self, fragment: &str) -> Result<(), EngineError>;

    /// Execute `statement` with `params` inside `tx`.
    fn execute(
        &self,
        tx: &dyn Transaction,
        statement: &str,
        params: &Params,
    ) -> Result<Box<dyn RowStream>, EngineError>;
}

/// Storage transaction manager
pub trait TransactionManager: Send + Sync {
    fn begin(&self) -> Result<Arc<dyn Transaction>, EngineError>;
}

/// An open transaction
pub trait Transaction: Send + Sync {
    fn commit(&self) -> Result<(), EngineError>;

    fn rollback(&self) -> Result<(), EngineError>;

    /// Ask the engine to abort any work running in this transaction.
    fn mark_for_termination(&self, reason: &str);

    /// Reason passed to `mark_for_termination`, if any.
    fn termination_reason(&self) -> Option<String>;
}

/// Commit `tx` if `outcome` succeeded, otherwise roll it back and keep the
/// original error.
pub(crate) fn settle<T>(tx: &dyn Transaction, outcome: RunResult<T>) -> RunResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            rollback_logged(tx);
            Err(e)
        }
    }
}

/// Run `work` against `tx` and settle the transaction.
///
/// A panic inside `work` rolls `tx` back and comes out as
/// `Panicked { task }`, so producers can relay it like any other failure.
pub(crate) fn run_settled<T>(
    tx: &dyn Transaction,
    task: &str,
    work: impl FnOnce(&dyn Transaction) -> RunResult<T>,
) -> RunResult<T> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(tx))).unwrap_or_else(|payload| {
        tracing::error!(task, panic = %panic_message(payload.as_ref()), "task_panicked");
        Err(RunnerError::panicked(task))
    });
    settle(tx, outcome)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Roll back `tx`, logging instead of returning a rollback failure.
pub(crate) fn rollback_logged(tx: &dyn Transaction) {
    if let Err(e) = tx.rollback() {
        tracing::warn!(error = %e, "rollback_failed");
    }
}
