//! Streaming Partition Driver
//!
//! A single `partition-driver` thread walks the partitions in order and
//! forwards every row into a large relay queue. The caller receives the
//! stream at once and rows flow before the driver finishes.
//!
//! | Mode | Where partitions run |
//! |------|----------------------|
//! | `Sequential` | on the driver thread, one after another |
//! | `Pooled` | on the worker pool, at most `threads` in flight, forwarded in partition order |

use super::{PartitionFuture, PartitionTask, WorkerPool};
use crate::config::DriverMode;
use crate::error::{RunResult, RunnerError};
use crate::execution::CancellationToken;
use crate::fragment::with_params_and_iterator;
use crate::partition::{default_target, PartitionPlan};
use crate::relay::{relay, RelayGuard, RelayRows, RelaySender};
use crate::runner::Shared;
use crate::value::{Params, Row, RowResult};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

/// Validate `fragment` and start the driver thread.
///
/// `partitions <= 0` selects the default partition target.
pub(crate) fn stream_partitions(
    shared: &Shared,
    fragment: &str,
    params: &Params,
    key: &str,
    items: Vec<Value>,
    partitions: i64,
    token: &CancellationToken,
) -> RunResult<RelayRows> {
    token.check()?;
    let statement = with_params_and_iterator(fragment, params.keys().map(String::as_str), key);
    let task = PartitionTask::prepare(shared, statement, params, key, token)?;

    let target = usize::try_from(partitions)
        .ok()
        .filter(|&p| p > 0)
        .unwrap_or_else(|| default_target(shared.config.partitions_per_cpu));
    let plan = PartitionPlan::new(items.len(), target, shared.config.max_batch_size);

    let (guard, stream) = relay(
        shared.config.streaming_capacity,
        shared.config.poll_timeout(),
        token,
    );
    let driver = PartitionDriver {
        task,
        plan,
        items,
        mode: shared.config.driver_mode,
        pool: Arc::clone(&shared.pool),
    };
    thread::Builder::new()
        .name("partition-driver".to_string())
        .spawn(move || driver.run(guard))
        .map_err(|e| RunnerError::spawn("partition driver", &e))?;
    Ok(stream.into_rows())
}

struct PartitionDriver {
    task: PartitionTask,
    plan: PartitionPlan,
    items: Vec<Value>,
    mode: DriverMode,
    pool: Arc<WorkerPool>,
}

impl PartitionDriver {
    fn run(self, relay: RelayGuard) {
        let started = Instant::now();
        let PartitionDriver {
            task,
            plan,
            items,
            mode,
            pool,
        } = self;
        let partitions = plan.split(items);

        let outcome = match mode {
            DriverMode::Sequential => drive_sequential(&task, partitions, relay.sender()),
            DriverMode::Pooled => drive_pooled(&task, &pool, partitions, relay.sender()),
        };

        match outcome {
            Ok(partitions) => info!(
                partitions,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "partition_driver_finished"
            ),
            Err(RunnerError::RelayClosed) => debug!("partition_driver_consumer_gone"),
            Err(e) if e.is_cancelled() => {
                debug!(error = %e, "partition_driver_cancelled");
                relay.fail(e);
            }
            Err(e) => {
                error!(error = %e, statement = task.statement(), "partition_driver_failed");
                relay.fail(RunnerError::BackgroundFailure {
                    source: Box::new(e),
                });
            }
        }
    }
}

fn drive_sequential(
    task: &PartitionTask,
    partitions: impl Iterator<Item = Vec<Value>>,
    relay: &RelaySender,
) -> RunResult<usize> {
    let mut count = 0;
    for partition in partitions {
        relay.token().check()?;
        task.stream_partition(partition, relay)?;
        count += 1;
    }
    Ok(count)
}

fn drive_pooled(
    task: &PartitionTask,
    pool: &WorkerPool,
    partitions: impl Iterator<Item = Vec<Value>>,
    relay: &RelaySender,
) -> RunResult<usize> {
    let window = pool.threads().max(1);
    let mut in_flight: VecDeque<PartitionFuture<Vec<Row>>> = VecDeque::with_capacity(window);
    let mut count = 0;

    for partition in partitions {
        relay.token().check()?;
        if in_flight.len() >= window {
            if let Some(oldest) = in_flight.pop_front() {
                forward(oldest, relay)?;
                count += 1;
            }
        }
        let task = task.clone();
        in_flight.push_back(pool.submit(move || task.run_partition(partition)));
    }
    while let Some(oldest) = in_flight.pop_front() {
        forward(oldest, relay)?;
        count += 1;
    }
    Ok(count)
}

fn forward(future: PartitionFuture<Vec<Row>>, relay: &RelaySender) -> RunResult<()> {
    let rows = future.join(relay.token())?;
    for (index, fields) in rows.into_iter().enumerate() {
        relay.put(RowResult::data(index as i64, fields))?;
    }
    Ok(())
}
