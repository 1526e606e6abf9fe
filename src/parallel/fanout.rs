//! Future-per-partition fan-out.

use super::{PartitionFuture, PartitionTask};
use crate::error::{RunResult, RunnerError};
use crate::execution::CancellationToken;
use crate::fragment::with_params_and_iterator;
use crate::partition::{default_target, PartitionPlan};
use crate::runner::Shared;
use crate::value::{Params, Row};
use serde_json::Value;
use std::collections::VecDeque;

/// Validate `fragment`, then submit one pool task per partition of `items`.
pub(crate) fn fan_out(
    shared: &Shared,
    fragment: &str,
    params: &Params,
    key: &str,
    items: Vec<Value>,
    token: &CancellationToken,
) -> RunResult<FanOutRows> {
    token.check()?;
    let statement = with_params_and_iterator(fragment, params.keys().map(String::as_str), key);
    let task = PartitionTask::prepare(shared, statement, params, key, token)?;

    let plan = PartitionPlan::new(
        items.len(),
        default_target(shared.config.partitions_per_cpu),
        shared.config.max_batch_size,
    );
    let mut pending = VecDeque::with_capacity(plan.partitions);
    for partition in plan.split(items) {
        token.check()?;
        let task = task.clone();
        pending.push_back(shared.pool.submit(move || task.run_partition(partition)));
    }
    tracing::debug!(
        partitions = pending.len(),
        batch_size = plan.batch_size,
        "fan_out_submitted"
    );

    Ok(FanOutRows {
        pending,
        current: Vec::new().into_iter(),
        statement: task.statement().to_string(),
        token: token.clone(),
        done: false,
    })
}

/// Rows of a fan-out, joined strictly in submission order.
///
/// The first failed partition ends the sequence with
/// [`RunnerError::Parallel`]; the results of its siblings are discarded.
pub struct FanOutRows {
    pending: VecDeque<PartitionFuture<Vec<Row>>>,
    current: std::vec::IntoIter<Row>,
    statement: String,
    token: CancellationToken,
    done: bool,
}

impl FanOutRows {
    fn finish(&mut self, error: RunnerError) -> Option<RunResult<Row>> {
        self.done = true;
        self.pending.clear();
        self.current = Vec::new().into_iter();
        Some(Err(error))
    }

    /// Partitions not yet joined.
    pub fn pending_partitions(&self) -> usize {
        self.pending.len()
    }
}

impl Iterator for FanOutRows {
    type Item = RunResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Err(e) = self.token.check() {
                return self.finish(e);
            }
            if let Some(row) = self.current.next() {
                return Some(Ok(row));
            }
            let Some(future) = self.pending.pop_front() else {
                self.done = true;
                return None;
            };
            match future.join(&self.token) {
                Ok(rows) => self.current = rows.into_iter(),
                Err(e) if e.is_cancelled() => return self.finish(e),
                Err(e) => {
                    let error = RunnerError::Parallel {
                        fragment: self.statement.clone(),
                        source: Box::new(e),
                    };
                    return self.finish(error);
                }
            }
        }
    }
}
