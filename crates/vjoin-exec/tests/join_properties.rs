//! Property tests: hash table resizes, probe resumability, and the per-row
//! emission guarantees of every join type.

use proptest::prelude::*;
use vjoin_exec::{
    AllocationScope, BatchSource, HashJoinConfig, HashJoinOperator, HashTable, IterOutcome,
    JoinCondition, JoinType, ScriptedSource,
};
use vjoin_types::{Batch, ColumnSpec, ColumnVectorType, Value};

type Row = [Option<i64>; 4];

fn join_type_strategy() -> impl Strategy<Value = JoinType> {
    prop_oneof![
        Just(JoinType::Inner),
        Just(JoinType::Left),
        Just(JoinType::Right),
        Just(JoinType::Full),
    ]
}

fn keys_strategy(max_len: usize) -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(prop::option::weighted(0.9, 0i64..6), 0..max_len)
}

fn chunks_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..5, 1..8)
}

/// Split `keys` into batches with sizes cycling through `chunks`. Each row
/// carries its index as an id column. No keys yields a single empty batch so
/// the input still has a schema.
fn batches(key: &str, id: &str, keys: &[Option<i64>], chunks: &[usize]) -> Vec<Batch> {
    let specs = [
        ColumnSpec::new(key, ColumnVectorType::Int64),
        ColumnSpec::required(id, ColumnVectorType::Int64),
    ];
    if keys.is_empty() {
        return vec![Batch::empty(&specs).expect("empty batch")];
    }
    let rows: Vec<Vec<Value>> = keys
        .iter()
        .enumerate()
        .map(|(idx, k)| vec![Value::from(*k), Value::Integer(idx as i64)])
        .collect();
    let mut out = Vec::new();
    let mut start = 0;
    for size in chunks.iter().cycle() {
        if start >= rows.len() {
            break;
        }
        let end = (start + size).min(rows.len());
        let part = &rows[start..end];
        out.push(Batch::from_rows(part, &specs, part.len()).expect("batch"));
        start = end;
    }
    out
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Integer(v) => Some(*v),
        other => panic!("unexpected value {other}"),
    }
}

fn run_join(
    join_type: JoinType,
    build: Vec<Batch>,
    probe: Vec<Batch>,
    output_batch_size: usize,
    min_buckets: usize,
) -> Vec<Row> {
    let config = HashJoinConfig::new(join_type, vec![JoinCondition::equals("pk", "k")])
        .with_output_batch_size(output_batch_size)
        .with_min_hash_table_size(min_buckets);
    let mut op = HashJoinOperator::new(
        config,
        ScriptedSource::from_batches("probe", probe),
        ScriptedSource::from_batches("build", build),
    )
    .expect("operator");
    let mut out = Vec::new();
    loop {
        match op.next() {
            IterOutcome::Ok | IterOutcome::OkNewSchema => {
                let batch = op.take_batch().expect("batch");
                assert!(batch.row_count() <= output_batch_size, "case=output_cap");
                for row in batch.to_rows() {
                    out.push([
                        as_int(&row[0]),
                        as_int(&row[1]),
                        as_int(&row[2]),
                        as_int(&row[3]),
                    ]);
                }
            }
            IterOutcome::NotYet => {}
            IterOutcome::None => return out,
            IterOutcome::Failed => panic!("join failed: {:?}", op.take_failure()),
        }
    }
}

/// Nested-loop join with NULL keys never matching.
fn reference(join_type: JoinType, build: &[Option<i64>], probe: &[Option<i64>]) -> Vec<Row> {
    let mut out = Vec::new();
    let mut matched = vec![false; build.len()];
    for (pid, pk) in probe.iter().enumerate() {
        let mut any = false;
        for (bid, bk) in build.iter().enumerate() {
            if pk.is_some() && pk == bk {
                out.push([*bk, Some(bid as i64), *pk, Some(pid as i64)]);
                matched[bid] = true;
                any = true;
            }
        }
        if !any && join_type.emits_unmatched_probe() {
            out.push([None, None, *pk, Some(pid as i64)]);
        }
    }
    if join_type.emits_unmatched_build() {
        for (bid, bk) in build.iter().enumerate() {
            if !matched[bid] {
                out.push([*bk, Some(bid as i64), None, None]);
            }
        }
    }
    out
}

fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_unstable();
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_probe_finds_every_entry_after_resizes(
        hashes in prop::collection::vec(0u32..64, 1..400),
        min_buckets in 1usize..16,
        load_factor in prop_oneof![Just(0.25f64), Just(0.5), Just(0.75), Just(1.0)],
    ) {
        let mut scope = AllocationScope::default();
        let mut table = HashTable::try_new(min_buckets, load_factor, &mut scope).expect("table");
        for &hash in &hashes {
            table.insert(hash, &mut scope).expect("insert");
        }
        prop_assert_eq!(table.len(), hashes.len(), "case=len");
        prop_assert!(
            table.len() as f64 <= table.bucket_count() as f64 * load_factor,
            "case=load_factor buckets={} len={}",
            table.bucket_count(),
            table.len()
        );
        for hash in 0u32..64 {
            let expected: Vec<u32> = hashes
                .iter()
                .enumerate()
                .filter(|&(_, &h)| h == hash)
                .map(|(slot, _)| slot as u32)
                .collect();
            let found: Vec<u32> = table.probe(hash).collect();
            prop_assert_eq!(found, expected, "case=chain hash={}", hash);
        }
    }

    #[test]
    fn prop_join_matches_nested_loop(
        join_type in join_type_strategy(),
        build_keys in keys_strategy(40),
        probe_keys in keys_strategy(40),
        build_chunks in chunks_strategy(),
        probe_chunks in chunks_strategy(),
        output_batch_size in 1usize..7,
        min_buckets in 1usize..8,
    ) {
        let actual = run_join(
            join_type,
            batches("k", "bid", &build_keys, &build_chunks),
            batches("pk", "pid", &probe_keys, &probe_chunks),
            output_batch_size,
            min_buckets,
        );
        let expected = reference(join_type, &build_keys, &probe_keys);
        prop_assert_eq!(sorted(actual), sorted(expected), "case=nested_loop {:?}", join_type);
    }

    #[test]
    fn prop_output_independent_of_probe_split_and_cap(
        join_type in join_type_strategy(),
        build_keys in keys_strategy(30),
        probe_keys in keys_strategy(30),
        first_chunks in chunks_strategy(),
        second_chunks in chunks_strategy(),
        first_cap in 1usize..5,
        second_cap in 5usize..64,
    ) {
        let one = run_join(
            join_type,
            batches("k", "bid", &build_keys, &[build_keys.len().max(1)]),
            batches("pk", "pid", &probe_keys, &first_chunks),
            first_cap,
            4,
        );
        let two = run_join(
            join_type,
            batches("k", "bid", &build_keys, &[3]),
            batches("pk", "pid", &probe_keys, &second_chunks),
            second_cap,
            4,
        );
        prop_assert_eq!(one, two, "case=resumable {:?}", join_type);
    }

    #[test]
    fn prop_row_emission_accounting(
        join_type in join_type_strategy(),
        build_keys in keys_strategy(30),
        probe_keys in keys_strategy(30),
        output_batch_size in 1usize..9,
    ) {
        let out = run_join(
            join_type,
            batches("k", "bid", &build_keys, &[4]),
            batches("pk", "pid", &probe_keys, &[3]),
            output_batch_size,
            2,
        );

        for (pid, pk) in probe_keys.iter().enumerate() {
            let pid = Some(pid as i64);
            let matches = pk.map_or(0, |k| build_keys.iter().filter(|&&b| b == Some(k)).count());
            let with_build = out.iter().filter(|r| r[3] == pid && r[1].is_some()).count();
            let unmatched = out.iter().filter(|r| r[3] == pid && r[1].is_none()).count();
            prop_assert_eq!(with_build, matches, "case=probe_matches pid={:?}", pid);
            let expected_unmatched = usize::from(matches == 0 && join_type.emits_unmatched_probe());
            prop_assert_eq!(unmatched, expected_unmatched, "case=probe_unmatched pid={:?}", pid);
        }

        for bid in 0..build_keys.len() {
            let bid = Some(bid as i64);
            let matched = out.iter().filter(|r| r[1] == bid && r[3].is_some()).count();
            let unmatched = out.iter().filter(|r| r[1] == bid && r[3].is_none()).count();
            if join_type.emits_unmatched_build() {
                prop_assert!(
                    (matched == 0 && unmatched == 1) || (matched >= 1 && unmatched == 0),
                    "case=build_exactly_once bid={:?} matched={} unmatched={}",
                    bid,
                    matched,
                    unmatched
                );
            } else {
                prop_assert_eq!(unmatched, 0, "case=no_build_padding bid={:?}", bid);
            }
        }
    }
}

#[test]
fn empty_inputs_produce_no_rows_for_every_join_type() {
    for join_type in [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Full] {
        let out = run_join(join_type, Vec::new(), Vec::new(), 4, 4);
        assert!(out.is_empty(), "case=empty {join_type:?}");
    }
}
