//! Row Types
//!
//! Rows flowing through the pipeline are ordered string-keyed maps of JSON
//! values, the same shape the engine hands back for each result record.
//!
//! ## Statistics rows
//!
//! The batch runner emits one statistics row (index `-1`) after every
//! statement. Its fields are the engine's structural-change counters plus
//! the number of rows produced and the elapsed time:
//!
//! ```text
//! { rows, time, nodesCreated, nodesDeleted, labelsAdded, labelsRemoved,
//!   relationshipsCreated, relationshipsDeleted, propertiesSet,
//!   constraintsAdded, constraintsRemoved, indexesAdded, indexesRemoved }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result record: field name to value.
pub type Row = Map<String, Value>;

/// Parameter mapping passed alongside a statement.
pub type Params = Map<String, Value>;

/// Index carried by statistics rows.
pub const STATISTICS_INDEX: i64 = -1;

/// A row tagged with its position inside the statement that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RowResult {
    index: i64,
    fields: Row,
}

impl RowResult {
    /// Data row at `index` (zero-based within its statement)
    pub fn data(index: i64, fields: Row) -> Self {
        RowResult { index, fields }
    }

    /// Statistics row summarising one statement
    pub fn statistics(fields: Row) -> Self {
        RowResult {
            index: STATISTICS_INDEX,
            fields,
        }
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }

    pub fn is_statistics(&self) -> bool {
        self.index == STATISTICS_INDEX
    }

    pub fn into_fields(self) -> Row {
        self.fields
    }
}

/// Structural-change counters reported by the engine once a statement's
/// rows are exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub constraints_added: u64,
    pub constraints_removed: u64,
    pub indexes_added: u64,
    pub indexes_removed: u64,
}

#[derive(Serialize)]
struct StatisticsFields {
    rows: u64,
    time: u64,
    #[serde(flatten)]
    counters: QueryStatistics,
}

impl QueryStatistics {
    /// Render the counters as the fields of a statistics row.
    pub fn to_row(&self, rows: u64, elapsed_ms: u64) -> Row {
        let fields = StatisticsFields {
            rows,
            time: elapsed_ms,
            counters: *self,
        };
        match serde_json::to_value(fields) {
            Ok(Value::Object(map)) => map,
            // A struct of integers always serializes to an object
            _ => Row::new(),
        }
    }
}

/// Build a single-field row.
pub fn single(key: &str, value: Value) -> Row {
    let mut row = Row::new();
    row.insert(key.to_string(), value);
    row
}
