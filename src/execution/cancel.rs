//! Cancellation Token
//!
//! Provides cooperative cancellation for every producer and consumer in the
//! pipeline.
//!
//! ## Design
//!
//! - Single-assignment reason (`OnceLock`): the first `cancel` wins, later
//!   calls are no-ops
//! - Attached transactions are marked for forced termination when the token
//!   fires, so a statement stuck inside the engine unblocks without waiting
//!   for the next `check()`
//! - Deadlines are scheduled on the shared [`DeadlineTimer`] thread
//! - Blocking relay operations `select!` on [`CancellationToken::signal`],
//!   a channel that disconnects when the token fires
//!
//! Loops call [`CancellationToken::check`] once per row, once per partition
//! and once per sequence advance.

use super::deadline::{DeadlineGuard, DeadlineTimer};
use crate::engine::{EngineError, Transaction};
use crate::error::{RunResult, RunnerError};
use crossbeam_channel as channel;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Cancellation signal for one run.
///
/// Clones share state. A token lives as long as its run and is never reused.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

struct TokenState {
    reason: OnceLock<String>,
    attached: Mutex<Vec<Weak<dyn Transaction>>>,
    // Dropped on cancel so every `signal` receiver wakes
    closer: Mutex<Option<channel::Sender<()>>>,
    signal: channel::Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (closer, signal) = channel::bounded(0);
        CancellationToken {
            inner: Arc::new(TokenState {
                reason: OnceLock::new(),
                attached: Mutex::new(Vec::new()),
                closer: Mutex::new(Some(closer)),
                signal,
            }),
        }
    }

    /// Fail fast with [`RunnerError::Cancelled`] if the token has fired.
    pub fn check(&self) -> RunResult<()> {
        match self.inner.reason.get() {
            Some(reason) => Err(RunnerError::Cancelled {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Fire the token. Returns `false` if it had already fired.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self.inner.reason.set(reason).is_err() {
            return false;
        }
        self.inner.closer.lock().take();
        let reason = self.reason().unwrap_or_default();
        let attached = std::mem::take(&mut *self.inner.attached.lock());
        for tx in attached.iter().filter_map(Weak::upgrade) {
            tx.mark_for_termination(&reason);
        }
        true
    }

    /// Receiver that never yields a message and disconnects once the token
    /// fires. Use it as a `select!` arm next to a blocking channel operation.
    pub fn signal(&self) -> &channel::Receiver<()> {
        &self.inner.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.get().cloned()
    }

    /// Bind a transaction to this token.
    ///
    /// If the token has already fired the transaction is marked at once.
    pub fn attach(&self, tx: &Arc<dyn Transaction>) {
        let mut attached = self.inner.attached.lock();
        if let Some(reason) = self.inner.reason.get() {
            drop(attached);
            tx.mark_for_termination(reason);
            return;
        }
        attached.retain(|weak| weak.strong_count() > 0);
        attached.push(Arc::downgrade(tx));
    }

    /// Map an engine failure to a runner error. After the token fires the
    /// cancellation is reported in place of the engine error.
    pub(crate) fn failure(&self, error: EngineError) -> RunnerError {
        match self.check() {
            Err(cancelled) => cancelled,
            Ok(()) => RunnerError::Execution(error),
        }
    }

    /// Schedule the token to fire after `duration` on the shared timer.
    ///
    /// Dropping the returned guard disarms the deadline.
    pub fn cancel_after(&self, duration: Duration) -> RunResult<DeadlineGuard> {
        let reason = format!("execution exceeded timeout of {}ms", duration.as_millis());
        DeadlineTimer::global()?.schedule(duration, self.clone(), reason)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        CancellationToken::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.inner.reason.get())
            .finish()
    }
}
