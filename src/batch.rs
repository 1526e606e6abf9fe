//! Statement Batch Runner
//!
//! Runs a multi-statement script and streams every row through a relay
//! queue.
//!
//! ## Flow
//!
//! ```text
//! caller thread                      batch-producer thread
//! ─────────────                      ─────────────────────
//! split + classify all statements
//! (MixedOperationKinds → Err)
//! spawn producer ──────────────────► begin ambient tx
//! return RelayStream                 for each statement:
//!                                      periodic → own thread + own tx
//!                                      otherwise → ambient tx
//!                                    join periodic threads
//!                                    commit | rollback + Failed(err)
//!                                    (a panic rolls back as Panicked)
//!                                    End (RelayGuard drop)
//! ```

use crate::engine::{run_settled, Engine, Transaction};
use crate::error::{RunResult, RunnerError};
use crate::execution::CancellationToken;
use crate::relay::{relay, RelayGuard, RelaySender, RelayStream};
use crate::runner::Shared;
use crate::statement::{split_script, BatchMode, Statement, StatementKind};
use crate::value::{Params, RowResult};
use std::io::BufRead;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Split and classify the whole script.
///
/// Fails on the first statement `mode` does not admit, before anything has
/// executed.
pub fn plan_batch<R: BufRead>(
    source: R,
    location: &str,
    mode: BatchMode,
) -> RunResult<Vec<Statement>> {
    let mut statements = Vec::new();
    for text in split_script(source) {
        let text = text.map_err(|source| RunnerError::Source {
            location: location.to_string(),
            source,
        })?;
        let statement = Statement::new(text);
        if !mode.admits(statement.kind) {
            return Err(RunnerError::MixedOperationKinds {
                expected: mode.expected(),
                found: statement.kind,
                statement: statement.text,
            });
        }
        statements.push(statement);
    }
    Ok(statements)
}

/// Start a batch over `source` and return its row stream.
pub(crate) fn run_batch<R: BufRead>(
    shared: &Shared,
    location: &str,
    source: R,
    params: Params,
    mode: BatchMode,
    token: &CancellationToken,
) -> RunResult<RelayStream> {
    token.check()?;
    let statements = plan_batch(source, location, mode)?;

    let (guard, stream) = relay(
        shared.config.relay_capacity,
        shared.config.poll_timeout(),
        token,
    );
    let runner = BatchRunner {
        shared: shared.clone(),
        statements,
        params,
        mode,
        run_id: Uuid::new_v4(),
    };
    thread::Builder::new()
        .name("batch-producer".to_string())
        .spawn(move || runner.run(guard))
        .map_err(|e| RunnerError::spawn("batch producer", &e))?;
    Ok(stream)
}

/// Producer side of one batch
struct BatchRunner {
    shared: Shared,
    statements: Vec<Statement>,
    params: Params,
    mode: BatchMode,
    run_id: Uuid,
}

impl BatchRunner {
    fn run(self, relay: RelayGuard) {
        let span = tracing::info_span!(
            "batch",
            run_id = %self.run_id,
            mode = ?self.mode,
            statements = self.statements.len()
        );
        let _entered = span.enter();
        let started = Instant::now();

        match self.execute(relay.sender()) {
            Ok(()) => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "batch_finished"
            ),
            Err(RunnerError::RelayClosed) => debug!("batch_consumer_gone"),
            Err(e) if e.is_cancelled() => {
                debug!(error = %e, "batch_cancelled");
                relay.fail(e);
            }
            Err(e) => {
                warn!(error = %e, "batch_failed");
                relay.fail(e);
            }
        }
    }

    fn execute(&self, relay: &RelaySender) -> RunResult<()> {
        let tx = self.shared.transactions.begin()?;
        relay.token().attach(&tx);
        run_settled(tx.as_ref(), "batch producer", |tx| {
            self.execute_statements(tx, relay)
        })
    }

    fn execute_statements(&self, tx: &dyn Transaction, relay: &RelaySender) -> RunResult<()> {
        let statistics = Some(self.shared.config.statistics_offer_timeout());
        let mut periodic = Vec::new();

        let outcome = self.statements.iter().try_for_each(|statement| {
            relay.token().check()?;
            debug!(kind = %statement.kind, "batch_statement_started");
            if statement.kind == StatementKind::Periodic {
                periodic.push(self.spawn_periodic(statement, relay)?);
                return Ok(());
            }
            execute_into(
                self.shared.engine.as_ref(),
                tx,
                &statement.text,
                &self.params,
                relay,
                statistics,
            )
            .map(drop)
            .inspect_err(|e| warn!(error = %e, statement = %statement.text, "batch_statement_failed"))
        });

        // Periodic work must finish before the ambient transaction settles
        let joined = join_periodic(periodic);
        outcome.and(joined)
    }

    fn spawn_periodic(
        &self,
        statement: &Statement,
        relay: &RelaySender,
    ) -> RunResult<JoinHandle<RunResult<u64>>> {
        let engine = Arc::clone(&self.shared.engine);
        let transactions = Arc::clone(&self.shared.transactions);
        let text = statement.text.clone();
        let params = self.params.clone();
        let relay = relay.clone();
        let statistics = Some(self.shared.config.statistics_offer_timeout());
        let span = tracing::Span::current();

        thread::Builder::new()
            .name("batch-periodic".to_string())
            .spawn(move || {
                let _entered = span.enter();
                let tx = transactions.begin()?;
                relay.token().attach(&tx);
                run_settled(tx.as_ref(), "periodic statement", |tx| {
                    execute_into(engine.as_ref(), tx, &text, &params, &relay, statistics)
                })
            })
            .map_err(|e| RunnerError::spawn("periodic statement", &e))
    }
}

/// Join every periodic thread and keep the first failure.
fn join_periodic(handles: Vec<JoinHandle<RunResult<u64>>>) -> RunResult<()> {
    let mut first = Ok(());
    for handle in handles {
        let outcome = handle
            .join()
            .unwrap_or_else(|_| Err(RunnerError::panicked("periodic statement")));
        match outcome {
            Ok(rows) => debug!(rows, "periodic_statement_finished"),
            Err(e) if first.is_ok() => first = Err(e),
            Err(e) => warn!(error = %e, "periodic_statement_failed"),
        }
    }
    first
}

/// Execute one statement and push its rows into `relay`, indexed from 0.
///
/// With `statistics` set, a statistics row is offered afterwards with that
/// timeout; a saturated queue drops it. Returns the number of data rows.
pub(crate) fn execute_into(
    engine: &dyn Engine,
    tx: &dyn Transaction,
    statement: &str,
    params: &Params,
    relay: &RelaySender,
    statistics: Option<Duration>,
) -> RunResult<u64> {
    let token = relay.token();
    let started = Instant::now();
    let mut rows = engine
        .execute(tx, statement, params)
        .map_err(|e| token.failure(e))?;

    let mut count: u64 = 0;
    for row in rows.by_ref() {
        token.check()?;
        let fields = row.map_err(|e| token.failure(e))?;
        relay.put(RowResult::data(count as i64, fields))?;
        count += 1;
    }

    if let Some(timeout) = statistics {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let summary = RowResult::statistics(rows.statistics().to_row(count, elapsed_ms));
        if !relay.offer(summary, timeout) {
            debug!(statement, rows = count, "statistics_row_dropped");
        }
    }
    Ok(count)
}
