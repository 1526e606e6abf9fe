//! Parallel Execution
//!
//! Two strategies run one fragment over partitions of a parameter list:
//!
//! - [`fanout`]: one pool task per partition, results joined in submission
//!   order by [`FanOutRows`]
//! - [`streaming`]: one driver thread feeding a large relay queue
//!
//! Both validate the rewritten statement once with `explain` before any
//! partition runs, and both run every partition in its own transaction.

mod fanout;
mod pool;
mod streaming;

pub use fanout::FanOutRows;
pub use pool::{PartitionFuture, WorkerPool};

pub(crate) use fanout::fan_out;
pub(crate) use streaming::stream_partitions;

use crate::batch::execute_into;
use crate::engine::{run_settled, Engine, Transaction, TransactionManager};
use crate::error::{RunResult, RunnerError};
use crate::execution::CancellationToken;
use crate::fragment::parallel_params;
use crate::relay::RelaySender;
use crate::runner::Shared;
use crate::value::{Params, Row};
use serde_json::Value;
use std::sync::Arc;

/// One validated statement, ready to run against any binding of `key`.
///
/// Clones are cheap and are handed to pool workers.
#[derive(Clone)]
pub(crate) struct PartitionTask {
    engine: Arc<dyn Engine>,
    transactions: Arc<dyn TransactionManager>,
    statement: Arc<str>,
    params: Arc<Params>,
    key: Arc<str>,
    token: CancellationToken,
}

impl PartitionTask {
    /// Validate `statement` with `explain`.
    pub(crate) fn prepare(
        shared: &Shared,
        statement: String,
        params: &Params,
        key: &str,
        token: &CancellationToken,
    ) -> RunResult<Self> {
        shared
            .engine
            .explain(&statement)
            .map_err(RunnerError::Plan)?;
        Ok(PartitionTask {
            engine: Arc::clone(&shared.engine),
            transactions: Arc::clone(&shared.transactions),
            statement: statement.into(),
            params: Arc::new(params.clone()),
            key: key.into(),
            token: token.clone(),
        })
    }

    pub(crate) fn statement(&self) -> &str {
        &self.statement
    }

    /// Run with `key` bound to `partition` and collect every row.
    pub(crate) fn run_partition(&self, partition: Vec<Value>) -> RunResult<Vec<Row>> {
        let capacity = partition.len();
        let params = parallel_params(&self.params, &self.key, partition);
        self.in_transaction(|tx| self.collect(tx, &params, capacity))
    }

    /// Run with `key` bound to a single element.
    pub(crate) fn run_item(&self, item: Value) -> RunResult<Vec<Row>> {
        let mut params = Params::clone(&self.params);
        params.insert(self.key.to_string(), item);
        self.in_transaction(|tx| self.collect(tx, &params, 1))
    }

    /// Run with `key` bound to `partition`, pushing rows into `relay`.
    pub(crate) fn stream_partition(
        &self,
        partition: Vec<Value>,
        relay: &RelaySender,
    ) -> RunResult<u64> {
        let params = parallel_params(&self.params, &self.key, partition);
        self.in_transaction(|tx| {
            execute_into(
                self.engine.as_ref(),
                tx,
                &self.statement,
                &params,
                relay,
                None,
            )
        })
    }

    fn in_transaction<T>(
        &self,
        work: impl FnOnce(&dyn Transaction) -> RunResult<T>,
    ) -> RunResult<T> {
        self.token.check()?;
        let tx = self.transactions.begin()?;
        self.token.attach(&tx);
        run_settled(tx.as_ref(), "partition", work)
    }

    fn collect(&self, tx: &dyn Transaction, params: &Params, capacity: usize) -> RunResult<Vec<Row>> {
        let rows = self
            .engine
            .execute(tx, &self.statement, params)
            .map_err(|e| self.token.failure(e))?;
        let mut collected = Vec::with_capacity(capacity);
        for row in rows {
            self.token.check()?;
            collected.push(row.map_err(|e| self.token.failure(e))?);
        }
        Ok(collected)
    }
}
