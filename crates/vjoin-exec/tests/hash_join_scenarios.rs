//! End-to-end join scenarios driven through the pull protocol.

use std::sync::Arc;

use vjoin_exec::{
    BatchSource, HashJoinConfig, HashJoinOperator, IterOutcome, JoinCondition, JoinError,
    JoinSide, JoinState, JoinType, KillLog, ScriptStep, ScriptedSource,
};
use vjoin_types::{Batch, ColumnSpec, ColumnVectorType, Schema, SelectionVector, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn build_specs() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("k", ColumnVectorType::Int64),
        ColumnSpec::new("a", ColumnVectorType::Text),
    ]
}

fn probe_specs() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("pk", ColumnVectorType::Int64),
        ColumnSpec::new("x", ColumnVectorType::Text),
    ]
}

fn rows(pairs: &[(i64, &str)]) -> Vec<Vec<Value>> {
    pairs
        .iter()
        .map(|&(k, s)| vec![Value::Integer(k), Value::from(s)])
        .collect()
}

fn batch(specs: &[ColumnSpec], pairs: &[(i64, &str)]) -> Batch {
    let rows = rows(pairs);
    Batch::from_rows(&rows, specs, rows.len().max(1)).expect("batch")
}

fn build_batch(pairs: &[(i64, &str)]) -> Batch {
    batch(&build_specs(), pairs)
}

fn probe_batch(pairs: &[(i64, &str)]) -> Batch {
    batch(&probe_specs(), pairs)
}

fn config(join_type: JoinType) -> HashJoinConfig {
    HashJoinConfig::new(join_type, vec![JoinCondition::equals("pk", "k")])
}

fn join(
    config: HashJoinConfig,
    probe: Vec<Batch>,
    build: Vec<Batch>,
) -> HashJoinOperator<ScriptedSource, ScriptedSource> {
    HashJoinOperator::new(
        config,
        ScriptedSource::from_batches("probe", probe),
        ScriptedSource::from_batches("build", build),
    )
    .expect("operator")
}

/// Pull until end of stream, collecting rows. Returns the failure instead if
/// the join fails.
fn drain<S: BatchSource>(op: &mut S) -> Result<Vec<Vec<Value>>, JoinError> {
    let mut out = Vec::new();
    loop {
        match op.next() {
            IterOutcome::Ok | IterOutcome::OkNewSchema => {
                let batch = op.take_batch().expect("batch after Ok");
                out.extend(batch.to_rows());
            }
            IterOutcome::NotYet => {}
            IterOutcome::None => return Ok(out),
            IterOutcome::Failed => {
                return Err(op.take_failure().expect("failure cause"));
            }
        }
    }
}

fn joined(k: Value, a: Value, pk: Value, x: Value) -> Vec<Value> {
    vec![k, a, pk, x]
}

fn sample_inputs() -> (Vec<Batch>, Vec<Batch>) {
    (
        vec![probe_batch(&[(1, "x"), (3, "y")])],
        vec![build_batch(&[(1, "a"), (2, "b")])],
    )
}

#[test]
fn inner_join_emits_matches_only() {
    init_tracing();
    let (probe, build) = sample_inputs();
    let mut op = join(config(JoinType::Inner), probe, build);
    let out = drain(&mut op).expect("inner join");
    assert_eq!(
        out,
        vec![joined(Value::Integer(1), "a".into(), Value::Integer(1), "x".into())],
        "case=inner"
    );
    assert_eq!(op.state(), JoinState::Done, "case=done");
    assert_eq!(op.metrics().output_rows, 1, "case=output_rows");
}

#[test]
fn left_join_pads_unmatched_probe_rows() {
    let (probe, build) = sample_inputs();
    let mut op = join(config(JoinType::Left), probe, build);
    let out = drain(&mut op).expect("left join");
    assert_eq!(
        out,
        vec![
            joined(Value::Integer(1), "a".into(), Value::Integer(1), "x".into()),
            joined(Value::Null, Value::Null, Value::Integer(3), "y".into()),
        ],
        "case=left"
    );
}

#[test]
fn right_join_emits_unmatched_build_rows_last() {
    let (probe, build) = sample_inputs();
    let mut op = join(config(JoinType::Right), probe, build);
    let out = drain(&mut op).expect("right join");
    assert_eq!(
        out,
        vec![
            joined(Value::Integer(1), "a".into(), Value::Integer(1), "x".into()),
            joined(Value::Integer(2), "b".into(), Value::Null, Value::Null),
        ],
        "case=right"
    );
}

#[test]
fn full_join_emits_both_unmatched_sides() {
    let (probe, build) = sample_inputs();
    let mut op = join(config(JoinType::Full), probe, build);
    let out = drain(&mut op).expect("full join");
    assert_eq!(
        out,
        vec![
            joined(Value::Integer(1), "a".into(), Value::Integer(1), "x".into()),
            joined(Value::Null, Value::Null, Value::Integer(3), "y".into()),
            joined(Value::Integer(2), "b".into(), Value::Null, Value::Null),
        ],
        "case=full"
    );
}

#[test]
fn empty_build_inner_drains_and_kills_probe() {
    let log = KillLog::default();
    let probe = ScriptedSource::from_batches(
        "probe",
        vec![probe_batch(&[(1, "x")]), probe_batch(&[(2, "y")])],
    )
    .with_kill_log(Arc::clone(&log));
    let build = ScriptedSource::new("build", Vec::new()).with_kill_log(Arc::clone(&log));
    let mut op = HashJoinOperator::new(config(JoinType::Inner), probe, build).expect("operator");

    assert_eq!(op.next(), IterOutcome::None, "case=end_of_stream");
    assert_eq!(op.state(), JoinState::Done, "case=done");
    assert!(op.probe_source().is_exhausted(), "case=probe_drained");
    assert_eq!(op.metrics().output_rows, 0, "case=no_output");
    assert_eq!(
        log.lock().as_slice(),
        ["probe".to_owned(), "build".to_owned()],
        "case=kill_order"
    );
}

#[test]
fn empty_build_left_keeps_probe_rows() {
    let mut op = join(
        config(JoinType::Left),
        vec![probe_batch(&[(7, "x")])],
        Vec::new(),
    );
    let out = drain(&mut op).expect("left join");
    assert_eq!(
        out,
        vec![vec![Value::Integer(7), Value::from("x")]],
        "case=probe_only_columns"
    );
}

#[test]
fn leading_empty_build_batch_is_skipped() {
    let mut op = join(
        config(JoinType::Inner),
        vec![probe_batch(&[(1, "x")])],
        vec![build_batch(&[]), build_batch(&[(1, "a")])],
    );
    let out = drain(&mut op).expect("join");
    assert_eq!(out.len(), 1, "case=one_match");
    assert_eq!(op.metrics().build_batches, 1, "case=empty_not_counted");
}

#[test]
fn build_schema_change_fails_without_output() {
    let text_key = vec![
        ColumnSpec::new("k", ColumnVectorType::Text),
        ColumnSpec::new("a", ColumnVectorType::Text),
    ];
    let second = Batch::from_rows(
        &[vec![Value::from("1"), Value::from("b")]],
        &text_key,
        1,
    )
    .expect("batch");
    let log = KillLog::default();
    let probe = ScriptedSource::from_batches("probe", vec![probe_batch(&[(1, "x")])])
        .with_kill_log(Arc::clone(&log));
    let build = ScriptedSource::from_batches("build", vec![build_batch(&[(1, "a")]), second])
        .with_kill_log(Arc::clone(&log));
    let mut op = HashJoinOperator::new(config(JoinType::Inner), probe, build).expect("operator");

    assert_eq!(op.next(), IterOutcome::Failed, "case=failed");
    assert_eq!(op.record_count(), 0, "case=no_output");
    assert!(
        matches!(
            op.failure(),
            Some(JoinError::SchemaChanged {
                side: JoinSide::Build,
                ..
            })
        ),
        "case=schema_changed: {:?}",
        op.failure()
    );
    assert_eq!(op.next(), IterOutcome::Failed, "case=failed_sticky");
    assert_eq!(op.scope().reserved(), 0, "case=released");
    assert_eq!(
        log.lock().as_slice(),
        ["probe".to_owned(), "build".to_owned()],
        "case=killed_once_each"
    );
}

#[test]
fn probe_schema_change_is_fatal() {
    let wide = Batch::from_rows(
        &[vec![Value::Integer(1), Value::from("x"), Value::Integer(9)]],
        &[
            ColumnSpec::new("pk", ColumnVectorType::Int64),
            ColumnSpec::new("x", ColumnVectorType::Text),
            ColumnSpec::new("extra", ColumnVectorType::Int64),
        ],
        1,
    )
    .expect("batch");
    let mut op = join(
        config(JoinType::Inner).with_output_batch_size(1),
        vec![probe_batch(&[(1, "x")]), wide],
        vec![build_batch(&[(1, "a")])],
    );
    assert_eq!(op.next(), IterOutcome::OkNewSchema, "case=first_batch");
    assert_eq!(op.next(), IterOutcome::Failed, "case=second_fails");
    assert!(
        matches!(
            op.take_failure(),
            Some(JoinError::SchemaChanged {
                side: JoinSide::Probe,
                ..
            })
        ),
        "case=probe_schema_changed"
    );
}

#[test]
fn selection_vectors_are_rejected_on_both_sides() {
    let selected = |batch: Batch| {
        batch
            .with_selection(SelectionVector::from_indices(vec![0]))
            .expect("selection")
    };

    let mut op = join(
        config(JoinType::Inner),
        vec![probe_batch(&[(1, "x")])],
        vec![selected(build_batch(&[(1, "a"), (2, "b")]))],
    );
    let error = drain(&mut op).expect_err("build selection");
    assert!(
        matches!(
            error,
            JoinError::UnsupportedInput {
                side: JoinSide::Build,
                ..
            }
        ),
        "case=build_selection: {error}"
    );

    let mut op = join(
        config(JoinType::Inner),
        vec![selected(probe_batch(&[(1, "x"), (2, "y")]))],
        vec![build_batch(&[(1, "a")])],
    );
    let error = drain(&mut op).expect_err("probe selection");
    assert!(
        matches!(
            error,
            JoinError::UnsupportedInput {
                side: JoinSide::Probe,
                ..
            }
        ),
        "case=probe_selection: {error}"
    );
}

#[test]
fn incompatible_key_types_are_rejected() {
    let float_probe = Batch::from_rows(
        &[vec![Value::Float(1.0), Value::from("x")]],
        &[
            ColumnSpec::new("pk", ColumnVectorType::Float64),
            ColumnSpec::new("x", ColumnVectorType::Text),
        ],
        1,
    )
    .expect("batch");
    let mut op = join(
        config(JoinType::Inner),
        vec![float_probe],
        vec![build_batch(&[(1, "a")])],
    );
    let error = drain(&mut op).expect_err("int vs float");
    assert!(
        matches!(error, JoinError::UnsupportedInput { .. }),
        "case=incompatible_keys: {error}"
    );
}

#[test]
fn tiny_memory_limit_fails_with_out_of_memory() {
    let pairs: Vec<(i64, &str)> = (0..512).map(|k| (k, "row")).collect();
    let mut op = join(
        config(JoinType::Inner)
            .with_min_hash_table_size(4)
            .with_memory_limit_bytes(256),
        vec![probe_batch(&[(1, "x")])],
        vec![build_batch(&pairs)],
    );
    let error = drain(&mut op).expect_err("out of memory");
    assert!(
        matches!(error, JoinError::OutOfMemory { .. }),
        "case=oom: {error}"
    );
    assert_eq!(op.state(), JoinState::Failed, "case=failed_state");
    assert_eq!(op.scope().reserved(), 0, "case=released");
}

#[test]
fn kill_then_pull_reports_cancelled() {
    let log = KillLog::default();
    let (probe, build) = sample_inputs();
    let mut op = HashJoinOperator::new(
        config(JoinType::Full),
        ScriptedSource::from_batches("probe", probe).with_kill_log(Arc::clone(&log)),
        ScriptedSource::from_batches("build", build).with_kill_log(Arc::clone(&log)),
    )
    .expect("operator");
    assert_eq!(op.next(), IterOutcome::OkNewSchema, "case=first");
    op.kill(true);
    op.kill(true);
    assert_eq!(op.next(), IterOutcome::Failed, "case=cancelled");
    assert_eq!(op.take_failure(), Some(JoinError::Cancelled), "case=cause");
    drop(op);
    assert_eq!(
        log.lock().as_slice(),
        ["probe".to_owned(), "build".to_owned()],
        "case=kill_once"
    );
}

#[test]
fn upstream_failure_without_cause_is_reported_per_side() {
    struct Broken;

    impl BatchSource for Broken {
        fn schema(&self) -> Option<&Schema> {
            None
        }

        fn next(&mut self) -> IterOutcome {
            IterOutcome::Failed
        }

        fn record_count(&self) -> usize {
            0
        }

        fn batch(&self) -> Option<&Batch> {
            None
        }

        fn take_batch(&mut self) -> Option<Batch> {
            None
        }

        fn kill(&mut self, _propagate_upstream: bool) {}
    }

    let mut op = HashJoinOperator::new(
        config(JoinType::Inner),
        ScriptedSource::from_batches("probe", vec![probe_batch(&[(1, "x")])]),
        Broken,
    )
    .expect("operator");
    let error = drain(&mut op).expect_err("upstream failure");
    assert!(
        matches!(
            error,
            JoinError::UpstreamFailed {
                side: JoinSide::Build,
                ..
            }
        ),
        "case=upstream: {error}"
    );
}

#[test]
fn output_schema_is_announced_once_and_stays_fixed() {
    let probe: Vec<Batch> = (0..4).map(|k| probe_batch(&[(k, "p")])).collect();
    let build = vec![build_batch(&[(0, "a"), (1, "b"), (2, "c"), (3, "d")])];
    let mut op = join(
        config(JoinType::Left).with_output_batch_size(1),
        probe,
        build,
    );
    let mut outcomes = Vec::new();
    let mut schemas = Vec::new();
    loop {
        let outcome = op.next();
        if !outcome.has_batch() {
            assert_eq!(outcome, IterOutcome::None, "case=clean_end");
            break;
        }
        outcomes.push(outcome);
        schemas.push(op.batch().expect("batch").schema());
    }
    assert_eq!(outcomes.len(), 4, "case=four_batches");
    assert_eq!(outcomes[0], IterOutcome::OkNewSchema, "case=first_new_schema");
    assert!(
        outcomes[1..].iter().all(|&o| o == IterOutcome::Ok),
        "case=rest_ok"
    );
    assert!(
        schemas.iter().all(|s| Some(s) == op.schema()),
        "case=schema_fixed"
    );
    let nullability: Vec<bool> = op
        .schema()
        .expect("schema")
        .fields()
        .iter()
        .map(|f| f.nullable)
        .collect();
    assert_eq!(nullability, vec![true; 4], "case=left_promotes_build");
}

#[test]
fn required_columns_are_promoted_by_join_type() {
    let build_req = vec![ColumnSpec::required("k", ColumnVectorType::Int64)];
    let probe_req = vec![ColumnSpec::required("pk", ColumnVectorType::Int64)];
    let one = |specs: &[ColumnSpec], k: i64| {
        Batch::from_rows(&[vec![Value::Integer(k)]], specs, 1).expect("batch")
    };

    for (join_type, expected) in [
        (JoinType::Inner, [false, false]),
        (JoinType::Left, [true, false]),
        (JoinType::Right, [false, true]),
        (JoinType::Full, [true, true]),
    ] {
        let mut op = join(
            config(join_type),
            vec![one(&probe_req, 1)],
            vec![one(&build_req, 2)],
        );
        let _ = drain(&mut op).expect("join");
        let nullable: Vec<bool> = op
            .schema()
            .expect("schema")
            .fields()
            .iter()
            .map(|f| f.nullable)
            .collect();
        assert_eq!(nullable, expected.to_vec(), "case={join_type:?}");
    }
}

#[test]
fn struct_build_column_stays_required_under_left_join() {
    let point = ColumnSpec::structure(
        "point",
        vec![
            ColumnSpec::new("x", ColumnVectorType::Float64),
            ColumnSpec::new("y", ColumnVectorType::Float64),
        ],
    );
    let build_specs = vec![ColumnSpec::new("k", ColumnVectorType::Int64), point];
    let build = Batch::from_rows(
        &[vec![
            Value::Integer(1),
            Value::Struct(vec![Value::Float(0.5), Value::Float(1.5)]),
        ]],
        &build_specs,
        1,
    )
    .expect("batch");
    let mut op = join(
        config(JoinType::Left),
        vec![probe_batch(&[(1, "x"), (2, "y")])],
        vec![build],
    );
    let out = drain(&mut op).expect("left join");
    assert_eq!(
        out,
        vec![
            vec![
                Value::Integer(1),
                Value::Struct(vec![Value::Float(0.5), Value::Float(1.5)]),
                Value::Integer(1),
                Value::from("x"),
            ],
            vec![
                Value::Null,
                Value::Struct(vec![Value::Null, Value::Null]),
                Value::Integer(2),
                Value::from("y"),
            ],
        ],
        "case=struct_padding"
    );
    let point_field = op.schema().expect("schema").field(1).expect("point");
    assert!(!point_field.nullable, "case=struct_not_promoted");
}

#[test]
fn null_keys_follow_comparator() {
    let probe = || {
        Batch::from_rows(
            &[vec![Value::Null, Value::from("x")]],
            &probe_specs(),
            1,
        )
        .expect("batch")
    };
    let build = || {
        Batch::from_rows(&[vec![Value::Null, Value::from("a")]], &build_specs(), 1)
            .expect("batch")
    };

    let mut op = join(config(JoinType::Inner), vec![probe()], vec![build()]);
    assert!(drain(&mut op).expect("equals").is_empty(), "case=equals_null");

    let mut op = join(
        HashJoinConfig::new(
            JoinType::Inner,
            vec![JoinCondition::is_not_distinct_from("pk", "k")],
        ),
        vec![probe()],
        vec![build()],
    );
    assert_eq!(
        drain(&mut op).expect("not distinct").len(),
        1,
        "case=not_distinct_null"
    );

    let mut op = join(config(JoinType::Right), vec![probe()], vec![build()]);
    assert_eq!(
        drain(&mut op).expect("right"),
        vec![joined(Value::Null, "a".into(), Value::Null, Value::Null)],
        "case=right_null_build_unmatched"
    );
}

#[test]
fn metrics_serialize_for_export() {
    let (probe, build) = sample_inputs();
    let mut op = join(config(JoinType::Left), probe, build);
    drain(&mut op).expect("join");
    let json = serde_json::to_value(op.metrics()).expect("serialize");
    assert_eq!(json["num_entries"], 2, "case=entries");
    assert_eq!(json["build_rows"], 2, "case=build_rows");
    assert_eq!(json["probe_rows"], 2, "case=probe_rows");
    assert_eq!(json["output_rows"], 2, "case=output_rows");
    assert_eq!(json["num_buckets"], 65536, "case=default_buckets");
}

#[test]
fn config_from_toml_drives_the_join() {
    let config = HashJoinConfig::from_toml_str(
        r#"
join_type = "LEFT"
output_batch_size = 1

[[conditions]]
probe = "pk"
build = "k"
"#,
    )
    .expect("config");
    let (probe, build) = sample_inputs();
    let mut op = join(config, probe, build);
    let out = drain(&mut op).expect("join");
    assert_eq!(out.len(), 2, "case=left_rows");
    assert_eq!(op.metrics().output_batches, 2, "case=one_row_batches");
}

#[test]
fn operator_can_be_moved_across_threads() {
    fn assert_send<T: Send>(_: &T) {}
    let (probe, build) = sample_inputs();
    let op = join(config(JoinType::Inner), probe, build);
    assert_send(&op);
    let handle = std::thread::spawn(move || {
        let mut op = op;
        drain(&mut op).expect("join").len()
    });
    assert_eq!(handle.join().expect("thread"), 1, "case=threaded");
}

#[test]
fn not_yet_stalls_are_absorbed_mid_probe() {
    let probe = ScriptedSource::new(
        "probe",
        vec![
            ScriptStep::Batch(probe_batch(&[(1, "x")])),
            ScriptStep::NotYet,
            ScriptStep::NotYet,
            ScriptStep::Batch(probe_batch(&[(2, "y")])),
        ],
    );
    let build = ScriptedSource::new(
        "build",
        vec![
            ScriptStep::NotYet,
            ScriptStep::Batch(build_batch(&[(1, "a"), (2, "b")])),
        ],
    );
    let mut op = HashJoinOperator::new(config(JoinType::Inner), probe, build).expect("operator");
    let out = drain(&mut op).expect("join");
    assert_eq!(
        out,
        vec![
            joined(Value::Integer(1), "a".into(), Value::Integer(1), "x".into()),
            joined(Value::Integer(2), "b".into(), Value::Integer(2), "y".into()),
        ],
        "case=stalls_transparent"
    );
    assert_eq!(op.metrics().probe_batches, 2, "case=probe_batches");
}

#[test]
fn schema_only_build_input_still_contributes_build_columns() {
    for join_type in [JoinType::Left, JoinType::Full] {
        let build = ScriptedSource::new("build", Vec::new())
            .with_schema(Schema::new(build_specs()));
        let probe = ScriptedSource::from_batches("probe", vec![probe_batch(&[(3, "y")])]);
        let mut op = HashJoinOperator::new(config(join_type), probe, build).expect("operator");
        let out = drain(&mut op).expect("outer join");
        assert_eq!(
            out,
            vec![joined(Value::Null, Value::Null, Value::Integer(3), "y".into())],
            "case=null_build_columns {join_type:?}"
        );
        let names: Vec<&str> = op
            .schema()
            .expect("schema")
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["k", "a", "pk", "x"], "case=output_columns {join_type:?}");
    }
}
