//! Deadline Timer
//!
//! One process-wide thread fires cancellation tokens at their deadlines,
//! independently of the threads moving data.
//!
//! ```text
//! cancel_after() --command_tx--► Timer thread
//!                                 ├─ min-heap of (deadline, seq)
//!                                 └─ recv_timeout(until next deadline)
//! DeadlineGuard drop --Disarmed--►   sweep disarmed entries
//! ```
//!
//! A dropped guard wakes the timer so the entry and its token clone leave
//! the heap right away instead of at the original deadline.

use super::cancel::CancellationToken;
use crate::error::{RunResult, RunnerError};
use crossbeam_channel as channel;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static GLOBAL_TIMER: OnceLock<DeadlineTimer> = OnceLock::new();

/// Handle to a timer thread.
///
/// The thread stops once the last handle and every outstanding guard drop.
pub struct DeadlineTimer {
    command_tx: channel::Sender<Command>,
    pending: Arc<AtomicUsize>,
}

enum Command {
    Schedule(Scheduled),
    Disarmed,
}

struct Scheduled {
    at: Instant,
    seq: u64,
    token: CancellationToken,
    reason: String,
    armed: Arc<AtomicBool>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl Scheduled {
    fn is_armed(&self) -> bool {
        self.armed.load(AtomicOrdering::Acquire)
    }

    fn fire(self) {
        if !self.is_armed() {
            return;
        }
        tracing::warn!(reason = %self.reason, "deadline_fired");
        self.token.cancel(self.reason);
    }
}

/// Disarms its deadline when dropped.
#[derive(Debug)]
pub struct DeadlineGuard {
    armed: Arc<AtomicBool>,
    waker: Option<channel::Sender<Command>>,
}

impl DeadlineGuard {
    pub fn disarm(&self) {
        let was_armed = self.armed.swap(false, AtomicOrdering::AcqRel);
        if let (true, Some(waker)) = (was_armed, &self.waker) {
            // A stopped timer has nothing left to sweep
            let _ = waker.send(Command::Disarmed);
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl DeadlineTimer {
    /// Start a dedicated timer thread.
    pub fn new() -> RunResult<Self> {
        let (command_tx, command_rx) = channel::unbounded::<Command>();
        let pending = Arc::new(AtomicUsize::new(0));
        let gauge = Arc::clone(&pending);
        std::thread::Builder::new()
            .name("deadline-timer".to_string())
            .spawn(move || run_timer(&command_rx, &gauge))
            .map_err(|e| RunnerError::spawn("deadline timer", &e))?;
        Ok(DeadlineTimer {
            command_tx,
            pending,
        })
    }

    /// Deadlines currently held by the timer thread.
    pub fn pending(&self) -> usize {
        self.pending.load(AtomicOrdering::Relaxed)
    }

    /// The shared process-wide timer, started on first use.
    pub fn global() -> RunResult<&'static DeadlineTimer> {
        if let Some(timer) = GLOBAL_TIMER.get() {
            return Ok(timer);
        }
        let timer = DeadlineTimer::new()?;
        // A racing initializer may win; the spare timer thread exits on drop
        Ok(GLOBAL_TIMER.get_or_init(|| timer))
    }

    /// Fire `token` with `reason` once `delay` has elapsed.
    ///
    /// A zero delay fires on the calling thread before returning.
    pub fn schedule(
        &self,
        delay: Duration,
        token: CancellationToken,
        reason: String,
    ) -> RunResult<DeadlineGuard> {
        static NEXT_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

        let armed = Arc::new(AtomicBool::new(true));
        let scheduled = Scheduled {
            at: Instant::now() + delay,
            seq: NEXT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            token,
            reason,
            armed: Arc::clone(&armed),
        };
        if delay.is_zero() {
            scheduled.fire();
            return Ok(DeadlineGuard { armed, waker: None });
        }
        self.command_tx
            .send(Command::Schedule(scheduled))
            .map_err(|_| RunnerError::Runtime("deadline timer stopped".to_string()))?;
        Ok(DeadlineGuard {
            armed,
            waker: Some(self.command_tx.clone()),
        })
    }
}

fn run_timer(command_rx: &channel::Receiver<Command>, gauge: &AtomicUsize) {
    let mut pending: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
    loop {
        let now = Instant::now();
        while pending.peek().is_some_and(|Reverse(next)| next.at <= now) {
            if let Some(Reverse(due)) = pending.pop() {
                due.fire();
            }
        }
        gauge.store(pending.len(), AtomicOrdering::Relaxed);

        let received = match pending.peek() {
            Some(Reverse(next)) => {
                command_rx.recv_timeout(next.at.saturating_duration_since(Instant::now()))
            }
            None => command_rx
                .recv()
                .map_err(|_| channel::RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Schedule(scheduled)) => pending.push(Reverse(scheduled)),
            Ok(Command::Disarmed) => pending.retain(|Reverse(entry)| entry.is_armed()),
            Err(channel::RecvTimeoutError::Timeout) => {}
            Err(channel::RecvTimeoutError::Disconnected) => {
                tracing::debug!(pending = pending.len(), "deadline_timer_stopped");
                return;
            }
        }
    }
}
