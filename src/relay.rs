//! Relay Queue
//!
//! A bounded channel between exactly one producer task and one consumer.
//!
//! ## Protocol
//!
//! ```text
//! producer ──Item(row)*──[Failed(err)]──End──► consumer
//! ```
//!
//! - `put` blocks while the queue is full (backpressure bounds memory to
//!   the queue capacity regardless of result size)
//! - `offer` is best-effort with a timeout and may drop the row
//! - `End` is pushed exactly once, last, by [`RelayGuard`] when it drops,
//!   so every exit path of the producer terminates the stream
//! - a guard dropped while its thread unwinds pushes `Failed(Panicked)`
//!   first, so a producer panic never looks like a clean end
//!
//! The consumer side is [`RelayStream`], a forward-only, single-pass
//! iterator. A poll that times out is a transient empty state, not the end
//! of the stream. Cancellation wakes both sides immediately through the
//! token's signal channel.

use crate::error::{RunResult, RunnerError};
use crate::execution::CancellationToken;
use crate::value::{Row, RowResult};
use crossbeam_channel::{self as channel, select};
use std::time::Duration;

/// Message carried by the relay queue
#[derive(Debug)]
pub enum Relayed {
    Item(RowResult),
    /// Producer failed; always followed by `End`
    Failed(RunnerError),
    End,
}

/// Create a relay queue of fixed `capacity`.
///
/// Returns the producer guard and the consumer stream. Both observe `token`.
pub fn relay(
    capacity: usize,
    poll_timeout: Duration,
    token: &CancellationToken,
) -> (RelayGuard, RelayStream) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    let sender = RelaySender {
        tx,
        token: token.clone(),
    };
    let stream = RelayStream {
        rx: Some(rx),
        token: token.clone(),
        poll_timeout,
    };
    (RelayGuard { sender }, stream)
}

/// Producer handle used to push rows.
///
/// Clones may be handed to helper threads (periodic statements) that must
/// finish before the owning [`RelayGuard`] drops.
#[derive(Clone)]
pub struct RelaySender {
    tx: channel::Sender<Relayed>,
    token: CancellationToken,
}

impl RelaySender {
    /// Push a row, blocking while the queue is full.
    ///
    /// Fails with `Cancelled` if the token fires while waiting and with
    /// `RelayClosed` if the consumer went away.
    pub fn put(&self, row: RowResult) -> RunResult<()> {
        self.token.check()?;
        select! {
            send(self.tx, Relayed::Item(row)) -> sent => sent.map_err(|_| RunnerError::RelayClosed),
            recv(self.token.signal()) -> _ => self.token.check(),
        }
    }

    /// Push a row if space frees up within `timeout`. Returns whether it was
    /// queued; a saturated queue drops the row.
    pub fn offer(&self, row: RowResult, timeout: Duration) -> bool {
        self.tx.send_timeout(Relayed::Item(row), timeout).is_ok()
    }

    /// Hand a producer failure to the consumer.
    pub fn fail(&self, error: RunnerError) {
        // A vanished consumer no longer cares about the failure
        let _ = self.tx.send(Relayed::Failed(error));
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Owns the producer side and pushes `End` exactly once when dropped.
pub struct RelayGuard {
    sender: RelaySender,
}

impl RelayGuard {
    pub fn sender(&self) -> &RelaySender {
        &self.sender
    }
}

impl std::ops::Deref for RelayGuard {
    type Target = RelaySender;

    fn deref(&self) -> &RelaySender {
        &self.sender
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("relay_producer_panicked");
            self.sender.fail(RunnerError::panicked("relay producer"));
        }
        // Blocks behind queued rows; returns once the consumer drains or drops
        let _ = self.sender.tx.send(Relayed::End);
    }
}

/// Consumer side of a relay queue.
///
/// Yields `Ok(row)` until the terminator, then `None` forever. A producer
/// failure or cancellation is yielded once as `Err` and ends the stream.
pub struct RelayStream {
    rx: Option<channel::Receiver<Relayed>>,
    token: CancellationToken,
    poll_timeout: Duration,
}

impl RelayStream {
    /// Relay streams are a single unit of work and never split.
    pub fn try_split(&mut self) -> Option<RelayStream> {
        None
    }

    pub fn is_exhausted(&self) -> bool {
        self.rx.is_none()
    }

    /// Drop the row index and keep the fields.
    pub fn into_rows(self) -> RelayRows {
        RelayRows { inner: self }
    }

    fn close(&mut self) {
        // Dropping the receiver unblocks a producer stuck on a full queue
        self.rx = None;
    }

    fn finish_with(&mut self, error: RunnerError) -> Option<RunResult<RowResult>> {
        self.close();
        Some(Err(error))
    }
}

impl Iterator for RelayStream {
    type Item = RunResult<RowResult>;

    fn next(&mut self) -> Option<Self::Item> {
        let rx = self.rx.clone()?;
        if let Err(e) = self.token.check() {
            return self.finish_with(e);
        }
        let signal = self.token.signal().clone();
        loop {
            let received = select! {
                recv(rx) -> msg => msg.map_err(|_| channel::RecvTimeoutError::Disconnected),
                recv(signal) -> _ => {
                    let reason = self.token.reason().unwrap_or_default();
                    return self.finish_with(RunnerError::Cancelled { reason });
                }
                default(self.poll_timeout) => Err(channel::RecvTimeoutError::Timeout),
            };
            match received {
                Ok(Relayed::Item(row)) => return Some(Ok(row)),
                Ok(Relayed::End) => {
                    self.close();
                    return None;
                }
                Ok(Relayed::Failed(e)) => return self.finish_with(e),
                Err(channel::RecvTimeoutError::Timeout) => {
                    if let Err(e) = self.token.check() {
                        return self.finish_with(e);
                    }
                    tracing::debug!(
                        timeout_ms = self.poll_timeout.as_millis() as u64,
                        "relay_poll_idle"
                    );
                }
                Err(channel::RecvTimeoutError::Disconnected) => {
                    return self.finish_with(RunnerError::RelayClosed);
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.rx.is_none() {
            (0, Some(0))
        } else {
            (0, None)
        }
    }
}

/// [`RelayStream`] yielding bare field maps.
pub struct RelayRows {
    inner: RelayStream,
}

impl Iterator for RelayRows {
    type Item = RunResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| r.map(RowResult::into_fields))
    }
}
