//! # Cypher Runner
//!
//! A streaming, cancellable, optionally parallel statement execution
//! pipeline. It takes a batch of independent units of work (script
//! statements, or partitions of a parameter list), executes each against a
//! shared engine, and exposes the combined result as one lazily consumed
//! sequence whose memory is bounded by backpressure.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! caller
//!   │
//!   ├─ Runner::run_batch ────────► batch-producer thread ──┐
//!   │    (split + classify first)   ambient tx + periodic   │
//!   │                                                       ▼
//!   ├─ Runner::run_parallel_streaming ► partition-driver ► relay queue ► RelayStream
//!   │                                                      (bounded)    (lazy pull)
//!   │
//!   ├─ Runner::run_parallel_fan_out ► worker pool ► PartitionFuture ► FanOutRows
//!   │                                 (one task per partition)      (ordered join)
//!   │
//!   └─ Runner::run / run_with_deadline ► StatementRows (own tx)
//!
//! CancellationToken ── checked per row, per partition, per advance
//!        ▲           └─ marks attached transactions for termination
//! DeadlineTimer thread (cancel_after)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cypher_runner::{CancellationToken, Config, Runner};
//!
//! let config = Config::load()?;
//! let runner = Runner::new(engine, transactions, config.execution)?;
//!
//! let token = CancellationToken::new();
//! for row in runner.run_many("CREATE (n) RETURN n;\nMATCH (n) RETURN n;\n", params, &token)? {
//!     let row = row?;
//!     if row.is_statistics() {
//!         println!("statement summary: {:?}", row.fields());
//!     }
//! }
//! ```
//!
//! The engine, the transaction manager and the transactions are supplied by
//! the embedding application through the traits in [`engine`].

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod fragment;
pub mod logging;
pub mod parallel;
pub mod partition;
pub mod relay;
pub mod runner;
pub mod source;
pub mod statement;
pub mod value;

pub use config::{Config, DriverMode, ExecutionConfig, LoggingConfig};
pub use engine::{Engine, EngineError, RowStream, Transaction, TransactionManager};
pub use error::{RunResult, RunnerError};
pub use execution::{CancellationToken, DeadlineGuard, DeadlineTimer};
pub use parallel::{FanOutRows, PartitionFuture, WorkerPool};
pub use partition::{PartitionPlan, Partitions};
pub use relay::{relay, RelayGuard, RelayRows, RelaySender, RelayStream, Relayed};
pub use runner::{Runner, StatementRows};
pub use source::open_reader;
pub use statement::{split_script, BatchMode, Statement, StatementKind};
pub use value::{Params, QueryStatistics, Row, RowResult, STATISTICS_INDEX};
