//! Execution Control
//!
//! Provides cooperative cancellation for every stage of the pipeline:
//! - Single-assignment cancellation tokens bound to transactions
//! - A shared timer thread for deadline-triggered forced termination

mod cancel;
mod deadline;

pub use cancel::CancellationToken;
pub use deadline::{DeadlineGuard, DeadlineTimer};
