//! Statement batch runner: splitting, classification, statistics rows and
//! ambient transaction handling.

mod common;

use common::{created, eventually, harness, params};
use cypher_runner::{
    BatchMode, CancellationToken, QueryStatistics, RowResult, RunnerError, StatementKind,
    STATISTICS_INDEX,
};
use serde_json::json;

fn collect(stream: impl Iterator<Item = Result<RowResult, RunnerError>>) -> Vec<RowResult> {
    stream.map(Result::unwrap).collect()
}

// ============================================================================
// Row and statistics streaming
// ============================================================================

#[test]
fn test_two_statements_stream_ten_items() {
    let h = harness();
    h.engine.respond("RETURN three", 3, created(3));
    h.engine.respond("RETURN five", 5, QueryStatistics::default());

    let token = CancellationToken::new();
    let mut stream = h
        .runner
        .run_many("RETURN three;\nRETURN five;\n", Default::default(), &token)
        .unwrap();

    let items: Vec<RowResult> = stream.by_ref().map(Result::unwrap).collect();
    let indices: Vec<i64> = items.iter().map(RowResult::index).collect();
    assert_eq!(indices, vec![0, 1, 2, -1, 0, 1, 2, 3, 4, -1]);

    // Exhaustion is permanent
    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
    assert!(stream.is_exhausted());
    assert!(stream.try_split().is_none());
}

#[test]
fn test_one_statistics_row_per_statement() {
    let h = harness();
    for name in ["RETURN a", "RETURN b", "RETURN c", "RETURN d"] {
        h.engine.respond(name, 2, QueryStatistics::default());
    }

    let token = CancellationToken::new();
    let script = "RETURN a;\nRETURN b;\r\nRETURN c;\nRETURN d;";
    let items = collect(h.runner.run_many(script, Default::default(), &token).unwrap());

    let statistics = items.iter().filter(|r| r.is_statistics()).count();
    assert_eq!(statistics, 4);
    assert_eq!(items.len(), 12);
}

#[test]
fn test_statistics_row_fields() {
    let h = harness();
    h.engine.respond("CREATE (n) RETURN n", 3, created(3));

    let token = CancellationToken::new();
    let items = collect(
        h.runner
            .run_many("CREATE (n) RETURN n;\n", Default::default(), &token)
            .unwrap(),
    );

    let summary = items.last().unwrap();
    assert_eq!(summary.index(), STATISTICS_INDEX);
    let fields = summary.fields();
    assert_eq!(fields["rows"], json!(3));
    assert_eq!(fields["nodesCreated"], json!(3));
    assert_eq!(fields["relationshipsDeleted"], json!(0));
    assert!(fields.contains_key("time"));
    assert_eq!(fields.len(), 13);
}

#[test]
fn test_statements_receive_params() {
    let h = harness();
    let token = CancellationToken::new();
    let p = params(&[("name", json!("Ada"))]);
    let items = collect(h.runner.run_many("CREATE (n {name: $name});\n", p, &token).unwrap());

    // No data rows, one statistics row
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].fields()["rows"], json!(0));
    assert_eq!(h.engine.executed(), vec!["CREATE (n {name: $name})"]);
}

#[test]
fn test_blank_statements_are_skipped() {
    let h = harness();
    let token = CancellationToken::new();
    let items = collect(
        h.runner
            .run_many("RETURN 1;\n;\n   \nRETURN 2;\n", Default::default(), &token)
            .unwrap(),
    );
    assert_eq!(h.engine.executed(), vec!["RETURN 1", "RETURN 2"]);
    assert_eq!(items.len(), 2);
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_mixed_script_fails_before_execution() {
    let h = harness();
    let token = CancellationToken::new();
    let script = "CREATE (n);\nCREATE INDEX ON :Person(name);\nCREATE (m);\n";

    let err = h
        .runner
        .run_many(script, Default::default(), &token)
        .err()
        .unwrap();
    match err {
        RunnerError::MixedOperationKinds {
            expected, found, ..
        } => {
            assert_eq!(expected, StatementKind::Data);
            assert_eq!(found, StatementKind::Schema);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.engine.executed().is_empty());
    assert_eq!(h.transactions.begun(), 0);
}

#[test]
fn test_schema_batch_rejects_data_statement() {
    let h = harness();
    let token = CancellationToken::new();
    let script = "CREATE INDEX ON :Person(name);\nMATCH (n) RETURN n;\n";

    let err = h
        .runner
        .run_batch(script.as_bytes(), Default::default(), BatchMode::Schema, &token)
        .err()
        .unwrap();
    assert!(err.to_string().starts_with(
        "Schema operations can't be mixed with data operations: expected schema statement, found data"
    ));
    assert!(h.engine.executed().is_empty());
}

#[test]
fn test_schema_batch_runs_in_order() {
    let h = harness();
    let token = CancellationToken::new();
    let script = "CREATE INDEX ON :Person(name);\nDROP CONSTRAINT ON (p:Person) ASSERT p.id IS UNIQUE;\n";

    let items = collect(
        h.runner
            .run_batch(script.as_bytes(), Default::default(), BatchMode::Schema, &token)
            .unwrap(),
    );
    assert_eq!(items.len(), 2);
    assert_eq!(
        h.engine.executed(),
        vec![
            "CREATE INDEX ON :Person(name)",
            "DROP CONSTRAINT ON (p:Person) ASSERT p.id IS UNIQUE"
        ]
    );
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_successful_batch_commits_ambient_transaction() {
    let h = harness();
    h.engine.respond("RETURN three", 3, QueryStatistics::default());
    let token = CancellationToken::new();

    let items = collect(
        h.runner
            .run_many("RETURN three;\nRETURN three;\n", Default::default(), &token)
            .unwrap(),
    );
    assert_eq!(items.len(), 8);
    assert_eq!(h.transactions.begun(), 1);
    assert!(eventually(|| h.transactions.committed() == 1));
    assert_eq!(h.transactions.rolled_back(), 0);
}

#[test]
fn test_failing_statement_rolls_back_and_reports() {
    let h = harness();
    h.engine.respond("RETURN three", 3, QueryStatistics::default());
    let token = CancellationToken::new();

    let mut stream = h
        .runner
        .run_many("RETURN three;\nFAIL here;\nRETURN three;\n", Default::default(), &token)
        .unwrap();

    let mut rows = Vec::new();
    let err = loop {
        match stream.next() {
            Some(Ok(row)) => rows.push(row),
            Some(Err(e)) => break e,
            None => panic!("stream ended without the failure"),
        }
    };
    assert_eq!(rows.len(), 4);
    assert!(matches!(err, RunnerError::Execution(_)));
    assert!(err.to_string().contains("Mock.Failure"));
    assert!(stream.next().is_none());

    // The third statement never ran
    assert_eq!(h.engine.executed(), vec!["RETURN three", "FAIL here"]);
    assert!(eventually(|| h.transactions.rolled_back() == 1));
    assert_eq!(h.transactions.committed(), 0);
}

#[test]
fn test_periodic_statement_gets_own_transaction() {
    let h = harness();
    h.engine
        .respond("USING PERIODIC COMMIT RETURN three", 3, QueryStatistics::default());
    h.engine.respond("RETURN five", 5, QueryStatistics::default());
    let token = CancellationToken::new();

    let items = collect(
        h.runner
            .run_many(
                "USING PERIODIC COMMIT RETURN three;\nRETURN five;\n",
                Default::default(),
                &token,
            )
            .unwrap(),
    );
    assert_eq!(items.len(), 10);
    assert_eq!(items.iter().filter(|r| r.is_statistics()).count(), 2);
    assert_eq!(h.transactions.begun(), 2);
    assert!(eventually(|| h.transactions.committed() == 2));
}

#[test]
fn test_failing_periodic_statement_fails_batch() {
    let h = harness();
    h.engine.respond("RETURN five", 5, QueryStatistics::default());
    let token = CancellationToken::new();

    let results: Vec<_> = h
        .runner
        .run_many(
            "USING PERIODIC COMMIT FAIL;\nRETURN five;\n",
            Default::default(),
            &token,
        )
        .unwrap()
        .collect();

    let last = results.last().unwrap();
    assert!(matches!(last, Err(RunnerError::Execution(_))));
    assert!(eventually(|| h.transactions.rolled_back() == 2));
}

#[test]
fn test_engine_panic_fails_batch_and_rolls_back() {
    let h = harness();
    let token = CancellationToken::new();
    let mut stream = h
        .runner
        .run_many("RETURN PANIC;\n", Default::default(), &token)
        .unwrap();

    assert!(stream.next().unwrap().is_ok());
    assert!(stream.next().unwrap().is_ok());
    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(err, RunnerError::Panicked { ref task } if task == "batch producer"));
    assert!(stream.next().is_none());

    assert!(eventually(|| h.transactions.rolled_back() == 1));
    assert_eq!(h.transactions.committed(), 0);
}

#[test]
fn test_panicking_periodic_statement_fails_batch() {
    let h = harness();
    h.engine.respond("RETURN five", 5, QueryStatistics::default());
    let token = CancellationToken::new();

    let results: Vec<_> = h
        .runner
        .run_many(
            "USING PERIODIC COMMIT RETURN PANIC;\nRETURN five;\n",
            Default::default(),
            &token,
        )
        .unwrap()
        .collect();

    let last = results.last().unwrap();
    assert!(matches!(last, Err(RunnerError::Panicked { task }) if task == "periodic statement"));
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    assert!(eventually(|| h.transactions.rolled_back() == 2));
    assert_eq!(h.transactions.committed(), 0);
}
