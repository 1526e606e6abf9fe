//! Runner Entry Points
//!
//! [`Runner`] is the public face of the pipeline. It owns the engine
//! collaborators, the execution config and a handle to the shared worker
//! pool, and exposes one method per way of running statements:
//!
//! | Method | Returns |
//! |--------|---------|
//! | `run`, `run_with_deadline`, `when`, `case` | [`StatementRows`] |
//! | `run_batch`, `run_many`, `run_file`, `run_schema_file` | [`RelayStream`] |
//! | `run_files`, `run_schema_files` | `Vec<RowResult>` |
//! | `run_parallel_fan_out` | [`FanOutRows`] |
//! | `run_parallel_streaming` | [`RelayRows`] |
//! | `run_parallel_per_item` | `Vec<Row>` |
//!
//! Every method takes the run's [`CancellationToken`]. A token that has
//! already fired fails the call with `Cancelled` before any work starts.

use crate::batch;
use crate::config::ExecutionConfig;
use crate::engine::{rollback_logged, settle, Engine, RowStream, Transaction, TransactionManager};
use crate::error::{RunResult, RunnerError};
use crate::execution::{CancellationToken, DeadlineGuard};
use crate::fragment::with_param_mapping;
use crate::parallel::{self, FanOutRows, PartitionTask, WorkerPool};
use crate::relay::{RelayRows, RelayStream};
use crate::source::open_reader;
use crate::statement::BatchMode;
use crate::value::{Params, Row, RowResult};
use rayon::prelude::*;
use serde_json::Value;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

/// Location reported for scripts passed in directly.
const INLINE_SCRIPT: &str = "<inline script>";

/// State shared by every invocation of one runner
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) transactions: Arc<dyn TransactionManager>,
    pub(crate) config: Arc<ExecutionConfig>,
    pub(crate) pool: Arc<WorkerPool>,
}

/// Streaming, cancellable statement runner
pub struct Runner {
    shared: Shared,
}

impl Runner {
    /// Create a runner on the process-wide worker pool.
    pub fn new(
        engine: Arc<dyn Engine>,
        transactions: Arc<dyn TransactionManager>,
        config: ExecutionConfig,
    ) -> RunResult<Self> {
        let pool = WorkerPool::global(config.worker_threads())?;
        Ok(Self::with_pool(engine, transactions, config, pool))
    }

    /// Create a runner on a caller-provided pool.
    pub fn with_pool(
        engine: Arc<dyn Engine>,
        transactions: Arc<dyn TransactionManager>,
        config: ExecutionConfig,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Runner {
            shared: Shared {
                engine,
                transactions,
                config: Arc::new(config),
                pool,
            },
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.shared.config
    }

    // ── Single statements ───────────────────────────────────────────────

    /// Run `fragment` with every parameter bound to a variable of the same
    /// name, in its own transaction.
    ///
    /// `default_timeout_ms` from the config, when non-zero, bounds the run.
    pub fn run(
        &self,
        fragment: &str,
        params: &Params,
        token: &CancellationToken,
    ) -> RunResult<StatementRows> {
        let statement = with_param_mapping(fragment, params.keys().map(String::as_str));
        let deadline = match self.shared.config.default_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        self.start(&statement, params, token, deadline)
    }

    /// Run `statement` as given and cancel it after `timeout_ms`.
    ///
    /// On expiry the transaction is marked for termination and the stream
    /// ends with `Cancelled`.
    pub fn run_with_deadline(
        &self,
        statement: &str,
        params: &Params,
        timeout_ms: u64,
        token: &CancellationToken,
    ) -> RunResult<StatementRows> {
        self.start(
            statement,
            params,
            token,
            Some(Duration::from_millis(timeout_ms)),
        )
    }

    /// Run `if_query` when `condition` holds, otherwise `else_query`.
    ///
    /// An empty chosen query yields one empty row.
    pub fn when(
        &self,
        condition: bool,
        if_query: &str,
        else_query: &str,
        params: &Params,
        token: &CancellationToken,
    ) -> RunResult<StatementRows> {
        let chosen = if condition { if_query } else { else_query };
        self.run_or_empty(chosen, params, token)
    }

    /// Run the query of the first true condition, else `else_query`.
    pub fn case<'q>(
        &self,
        conditionals: impl IntoIterator<Item = (bool, &'q str)>,
        else_query: &str,
        params: &Params,
        token: &CancellationToken,
    ) -> RunResult<StatementRows> {
        let chosen = conditionals
            .into_iter()
            .find_map(|(condition, query)| condition.then_some(query))
            .unwrap_or(else_query);
        self.run_or_empty(chosen, params, token)
    }

    fn run_or_empty(
        &self,
        query: &str,
        params: &Params,
        token: &CancellationToken,
    ) -> RunResult<StatementRows> {
        token.check()?;
        if query.trim().is_empty() {
            return Ok(StatementRows::single(Row::new()));
        }
        self.run(query, params, token)
    }

    fn start(
        &self,
        statement: &str,
        params: &Params,
        token: &CancellationToken,
        deadline: Option<Duration>,
    ) -> RunResult<StatementRows> {
        token.check()?;
        let tx = self.shared.transactions.begin()?;
        token.attach(&tx);

        let deadline = match deadline.map(|d| token.cancel_after(d)).transpose() {
            Ok(guard) => guard,
            Err(e) => return settle(tx.as_ref(), Err(e)),
        };

        match self.shared.engine.execute(tx.as_ref(), statement, params) {
            Ok(rows) => Ok(StatementRows {
                state: RowsState::Streaming { rows, tx },
                token: token.clone(),
                deadline,
            }),
            Err(e) => settle(tx.as_ref(), Err(token.failure(e))),
        }
    }

    // ── Batches ─────────────────────────────────────────────────────────

    /// Run every statement of `source` and stream rows and statistics.
    pub fn run_batch(
        &self,
        source: impl BufRead,
        params: Params,
        mode: BatchMode,
        token: &CancellationToken,
    ) -> RunResult<RelayStream> {
        batch::run_batch(&self.shared, INLINE_SCRIPT, source, params, mode, token)
    }

    /// Run a `;`-separated data script.
    pub fn run_many(
        &self,
        script: &str,
        params: Params,
        token: &CancellationToken,
    ) -> RunResult<RelayStream> {
        self.run_batch(script.as_bytes(), params, BatchMode::Data, token)
    }

    /// Run the data script at `location` (path, `file:` or http(s) URL).
    pub fn run_file(&self, location: &str, token: &CancellationToken) -> RunResult<RelayStream> {
        self.run_location(location, BatchMode::Data, token)
    }

    /// Run the schema script at `location`.
    pub fn run_schema_file(
        &self,
        location: &str,
        token: &CancellationToken,
    ) -> RunResult<RelayStream> {
        self.run_location(location, BatchMode::Schema, token)
    }

    /// Run data scripts one after another and collect every row.
    pub fn run_files<S: AsRef<str>>(
        &self,
        locations: &[S],
        token: &CancellationToken,
    ) -> RunResult<Vec<RowResult>> {
        self.collect_locations(locations, BatchMode::Data, token)
    }

    /// Run schema scripts one after another and collect every row.
    pub fn run_schema_files<S: AsRef<str>>(
        &self,
        locations: &[S],
        token: &CancellationToken,
    ) -> RunResult<Vec<RowResult>> {
        self.collect_locations(locations, BatchMode::Schema, token)
    }

    fn run_location(
        &self,
        location: &str,
        mode: BatchMode,
        token: &CancellationToken,
    ) -> RunResult<RelayStream> {
        token.check()?;
        let reader = open_reader(location)?;
        batch::run_batch(&self.shared, location, reader, Params::new(), mode, token)
    }

    fn collect_locations<S: AsRef<str>>(
        &self,
        locations: &[S],
        mode: BatchMode,
        token: &CancellationToken,
    ) -> RunResult<Vec<RowResult>> {
        let mut collected = Vec::new();
        for location in locations {
            for row in self.run_location(location.as_ref(), mode, token)? {
                collected.push(row?);
            }
        }
        Ok(collected)
    }

    // ── Parallel ────────────────────────────────────────────────────────

    /// Run `fragment` over partitions of `items` bound to `key`, one pool
    /// task per partition, and join the results in order.
    pub fn run_parallel_fan_out(
        &self,
        fragment: &str,
        params: &Params,
        key: &str,
        items: Vec<Value>,
        token: &CancellationToken,
    ) -> RunResult<FanOutRows> {
        parallel::fan_out(&self.shared, fragment, params, key, items, token)
    }

    /// Run `fragment` over partitions of `items` bound to `key` from a
    /// single driver thread and stream the rows.
    pub fn run_parallel_streaming(
        &self,
        fragment: &str,
        params: &Params,
        key: &str,
        items: Vec<Value>,
        partitions: i64,
        token: &CancellationToken,
    ) -> RunResult<RelayRows> {
        parallel::stream_partitions(&self.shared, fragment, params, key, items, partitions, token)
    }

    /// Run `fragment` once per element of the list parameter `key`, with
    /// `key` bound to that element. Rows keep element order.
    pub fn run_parallel_per_item(
        &self,
        fragment: &str,
        params: &Params,
        key: &str,
        token: &CancellationToken,
    ) -> RunResult<Vec<Row>> {
        token.check()?;
        let items = match params.get(key) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(RunnerError::InvalidArgument(format!(
                    "Can't parallelize a non collection {key} : {other}"
                )))
            }
            None => {
                let available: Vec<&str> = params.keys().map(String::as_str).collect();
                return Err(RunnerError::InvalidArgument(format!(
                    "Can't parallelize on key {key} available keys {available:?}"
                )));
            }
        };

        let statement = with_param_mapping(fragment, params.keys().map(String::as_str));
        let task = PartitionTask::prepare(&self.shared, statement, params, key, token)?;
        let per_item = self.shared.pool.install(|| {
            items
                .into_par_iter()
                .map(|item| task.run_item(item))
                .collect::<RunResult<Vec<_>>>()
        })?;
        Ok(per_item.into_iter().flatten().collect())
    }
}

enum RowsState {
    Streaming {
        rows: Box<dyn RowStream>,
        tx: Arc<dyn Transaction>,
    },
    Constant(Option<Row>),
    Done,
}

/// Rows of one statement run in its own transaction.
///
/// The transaction commits when the rows are exhausted and rolls back on
/// failure, cancellation or an early drop.
pub struct StatementRows {
    state: RowsState,
    token: CancellationToken,
    deadline: Option<DeadlineGuard>,
}

impl StatementRows {
    /// A stream of exactly `row`, touching no transaction.
    pub fn single(row: Row) -> Self {
        StatementRows {
            state: RowsState::Constant(Some(row)),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    fn finish(&mut self) {
        self.state = RowsState::Done;
        self.deadline = None;
    }
}

impl Iterator for StatementRows {
    type Item = RunResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.state, RowsState::Done) {
            RowsState::Done => None,
            RowsState::Constant(row) => {
                self.finish();
                row.map(Ok)
            }
            RowsState::Streaming { mut rows, tx } => {
                if let Err(e) = self.token.check() {
                    rollback_logged(tx.as_ref());
                    self.finish();
                    return Some(Err(e));
                }
                match rows.next() {
                    Some(Ok(row)) => {
                        self.state = RowsState::Streaming { rows, tx };
                        Some(Ok(row))
                    }
                    Some(Err(e)) => {
                        let error = self.token.failure(e);
                        rollback_logged(tx.as_ref());
                        self.finish();
                        Some(Err(error))
                    }
                    None => {
                        self.finish();
                        tx.commit().err().map(|e| Err(e.into()))
                    }
                }
            }
        }
    }
}

impl Drop for StatementRows {
    fn drop(&mut self) {
        if let RowsState::Streaming { tx, .. } = &self.state {
            tracing::debug!("statement_rows_dropped_early");
            rollback_logged(tx.as_ref());
        }
    }
}
