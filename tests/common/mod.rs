//! Scripted in-memory engine shared by the integration tests.
//!
//! Behavior by statement text:
//! - registered with `respond` → those rows and statistics
//! - contains `FAIL` → execution error
//! - contains `SLOW` → a long stream, one row every few ms, that stops with
//!   `Terminated` once its transaction is marked
//! - contains `PANIC` → two rows, then the row stream panics
//! - contains ``UNWIND $`k` `` → one row `{k: element}` per list element
//! - starts with `WITH $` → one row holding the parameters
//! - anything else → no rows
//!
//! `explain` rejects statements containing `INVALID`.

#![allow(dead_code)]

use cypher_runner::{
    Engine, EngineError, ExecutionConfig, Params, QueryStatistics, Row, RowStream, Runner,
    Transaction, TransactionManager, WorkerPool,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Transactions
// ============================================================================

#[derive(Default)]
pub struct MockTx {
    committed: AtomicBool,
    rolled_back: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl MockTx {
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::SeqCst)
    }
}

impl Transaction for MockTx {
    fn commit(&self) -> Result<(), EngineError> {
        self.committed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> Result<(), EngineError> {
        self.rolled_back.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn mark_for_termination(&self, reason: &str) {
        *self.reason.lock() = Some(reason.to_string());
    }

    fn termination_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

#[derive(Default)]
pub struct MockTransactions {
    begun: Mutex<Vec<Arc<MockTx>>>,
}

impl MockTransactions {
    pub fn begun(&self) -> usize {
        self.begun.lock().len()
    }

    pub fn committed(&self) -> usize {
        self.begun.lock().iter().filter(|tx| tx.is_committed()).count()
    }

    pub fn rolled_back(&self) -> usize {
        self.begun.lock().iter().filter(|tx| tx.is_rolled_back()).count()
    }

    pub fn all(&self) -> Vec<Arc<MockTx>> {
        self.begun.lock().clone()
    }

    /// The registered transaction behind `tx`.
    fn find(&self, tx: &dyn Transaction) -> Option<Arc<MockTx>> {
        let addr = tx as *const dyn Transaction as *const ();
        self.begun
            .lock()
            .iter()
            .find(|candidate| Arc::as_ptr(candidate) as *const () == addr)
            .cloned()
    }
}

impl TransactionManager for MockTransactions {
    fn begin(&self) -> Result<Arc<dyn Transaction>, EngineError> {
        let tx = Arc::new(MockTx::default());
        self.begun.lock().push(Arc::clone(&tx));
        Ok(tx)
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct MockEngine {
    transactions: Arc<MockTransactions>,
    responses: Mutex<HashMap<String, (Vec<Row>, QueryStatistics)>>,
    executed: Mutex<Vec<String>>,
    explained: Mutex<Vec<String>>,
    fail_on: Mutex<Option<Value>>,
}

impl MockEngine {
    pub fn new(transactions: Arc<MockTransactions>) -> Self {
        MockEngine {
            transactions,
            responses: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            explained: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// Make `statement` return `count` rows `{n: 0..count}`.
    pub fn respond(&self, statement: &str, count: usize, statistics: QueryStatistics) {
        let rows = (0..count).map(|n| row("n", json!(n))).collect();
        self.responses
            .lock()
            .insert(statement.to_string(), (rows, statistics));
    }

    /// Fail any unwound partition containing `value`.
    pub fn fail_on(&self, value: Value) {
        *self.fail_on.lock() = Some(value);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn explained(&self) -> Vec<String> {
        self.explained.lock().clone()
    }

    fn unwind(&self, statement: &str, params: &Params) -> Result<Vec<Row>, EngineError> {
        let Some(key) = unwound_key(statement) else {
            return Ok(Vec::new());
        };
        let items = match params.get(&key) {
            Some(Value::Array(items)) => items.clone(),
            _ => return Err(EngineError::execution("Mock.Type", "not a list")),
        };
        if let Some(bad) = self.fail_on.lock().as_ref() {
            if items.contains(bad) {
                return Err(EngineError::execution("Mock.Failure", format!("{key} = {bad}")));
            }
        }
        Ok(items.into_iter().map(|item| row(&key, item)).collect())
    }
}

impl Engine for MockEngine {
    fn explain(&self, fragment: &str) -> Result<(), EngineError> {
        self.explained.lock().push(fragment.to_string());
        if fragment.contains("INVALID") {
            return Err(EngineError::Plan(format!("Invalid input: {fragment}")));
        }
        Ok(())
    }

    fn execute(
        &self,
        tx: &dyn Transaction,
        statement: &str,
        params: &Params,
    ) -> Result<Box<dyn RowStream>, EngineError> {
        self.executed.lock().push(statement.to_string());
        if let Some(reason) = tx.termination_reason() {
            return Err(EngineError::Terminated(reason));
        }
        if statement.contains("FAIL") {
            return Err(EngineError::execution("Mock.Failure", statement));
        }
        if let Some((rows, statistics)) = self.responses.lock().get(statement).cloned() {
            return Ok(Box::new(MockRows::new(rows, statistics)));
        }
        if statement.contains("SLOW") {
            let rows = (0..10_000).map(|n| row("n", json!(n))).collect();
            let mut stream = MockRows::new(rows, QueryStatistics::default());
            stream.delay = Some(Duration::from_millis(2));
            stream.watched = self.transactions.find(tx);
            return Ok(Box::new(stream));
        }
        if statement.contains("PANIC") {
            let rows = (0..10).map(|n| row("n", json!(n))).collect();
            let mut stream = MockRows::new(rows, QueryStatistics::default());
            stream.panic_after = Some(2);
            return Ok(Box::new(stream));
        }
        if statement.contains("UNWIND $`") {
            let rows = self.unwind(statement, params)?;
            return Ok(Box::new(MockRows::new(rows, QueryStatistics::default())));
        }
        if statement.starts_with("WITH $") {
            return Ok(Box::new(MockRows::new(
                vec![params.clone()],
                QueryStatistics::default(),
            )));
        }
        Ok(Box::new(MockRows::new(Vec::new(), QueryStatistics::default())))
    }
}

struct MockRows {
    rows: std::vec::IntoIter<Row>,
    statistics: QueryStatistics,
    delay: Option<Duration>,
    watched: Option<Arc<MockTx>>,
    panic_after: Option<usize>,
    emitted: usize,
}

impl MockRows {
    fn new(rows: Vec<Row>, statistics: QueryStatistics) -> Self {
        MockRows {
            rows: rows.into_iter(),
            statistics,
            delay: None,
            watched: None,
            panic_after: None,
            emitted: 0,
        }
    }
}

impl Iterator for MockRows {
    type Item = Result<Row, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(reason) = self.watched.as_ref().and_then(|tx| tx.termination_reason()) {
            return Some(Err(EngineError::Terminated(reason)));
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.panic_after == Some(self.emitted) {
            panic!("row stream broke after {} rows", self.emitted);
        }
        self.emitted += 1;
        self.rows.next().map(Ok)
    }
}

impl RowStream for MockRows {
    fn statistics(&self) -> QueryStatistics {
        self.statistics
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub struct Harness {
    pub runner: Runner,
    pub engine: Arc<MockEngine>,
    pub transactions: Arc<MockTransactions>,
}

pub fn harness() -> Harness {
    harness_with(ExecutionConfig::default())
}

pub fn harness_with(config: ExecutionConfig) -> Harness {
    let transactions = Arc::new(MockTransactions::default());
    let engine = Arc::new(MockEngine::new(Arc::clone(&transactions)));
    let pool = WorkerPool::global(4).unwrap();
    let runner = Runner::with_pool(
        Arc::clone(&engine) as Arc<dyn Engine>,
        Arc::clone(&transactions) as Arc<dyn TransactionManager>,
        config,
        pool,
    );
    Harness {
        runner,
        engine,
        transactions,
    }
}

pub fn row(key: &str, value: Value) -> Row {
    let mut row = Row::new();
    row.insert(key.to_string(), value);
    row
}

pub fn params(pairs: &[(&str, Value)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn created(nodes: u64) -> QueryStatistics {
    QueryStatistics {
        nodes_created: nodes,
        ..QueryStatistics::default()
    }
}

/// Poll `condition` for up to two seconds.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn unwound_key(statement: &str) -> Option<String> {
    let start = statement.find("UNWIND $`")? + "UNWIND $`".len();
    let len = statement[start..].find('`')?;
    Some(statement[start..start + len].to_string())
}
