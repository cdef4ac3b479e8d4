// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use kts_core::{ChangePointSet, KtsError, validate_change_points};
use kts_offline::{
    GramMatrix, KernelSpec, ScatterTable, build_gram, compute_scatters, segment_auto,
    segment_fixed,
};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

const MIN_PROPTEST_CASES: u32 = 256;
const MONOTONE_SLACK: f64 = 1.0e-9;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

/// Integer-valued descriptors keep every Gram entry and prefix sum exact.
fn feature_rows(max_n: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
    (1usize..=3, 1usize..=max_n).prop_flat_map(|(d, n)| {
        prop::collection::vec(
            prop::collection::vec((-5i32..=5).prop_map(f64::from), d),
            n,
        )
    })
}

fn gram_and_table(rows: &[Vec<f64>]) -> (GramMatrix, ScatterTable) {
    let gram = build_gram(rows, &KernelSpec::Linear).expect("gram should build");
    let table = {
        let kernel = gram.kernel().expect("gram should be a valid kernel");
        compute_scatters(&kernel).expect("scatter should compute")
    };
    (gram, table)
}

fn assert_segment_bounds(set: &ChangePointSet, min_len: usize, max_len: usize) {
    validate_change_points(set.n(), set.as_slice()).expect("change point contract must hold");
    for (start, end) in set.segments() {
        let len = end - start;
        assert!(
            (min_len..=max_len).contains(&len),
            "segment [{start}, {end}) violates bounds [{min_len}, {max_len}]"
        );
    }
}

/// Exhaustive minimum over every partition with `k` change points.
fn brute_force_min(
    table: &ScatterTable,
    k: usize,
    min_len: usize,
    max_len: usize,
) -> Option<f64> {
    fn walk(
        table: &ScatterTable,
        start: usize,
        remaining: usize,
        min_len: usize,
        max_len: usize,
        acc: f64,
        best: &mut Option<f64>,
    ) {
        let n = table.n();
        if remaining == 0 {
            let len = n - start;
            if (min_len..=max_len).contains(&len) {
                let total = acc + table.segment_cost(start, n);
                if best.is_none_or(|current| total < current) {
                    *best = Some(total);
                }
            }
            return;
        }
        for end in start + 1..n {
            let len = end - start;
            if len < min_len || len > max_len {
                continue;
            }
            let acc = acc + table.segment_cost(start, end);
            walk(table, end, remaining - 1, min_len, max_len, acc, best);
        }
    }

    let mut best = None;
    walk(table, 0, k, min_len, max_len, 0.0, &mut best);
    best
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        max_shrink_iters: 1024,
        failure_persistence: Some(Box::new(FileFailurePersistence::Direct("proptest-regressions/tests/proptest_invariants.txt"))),
        .. ProptestConfig::default()
    })]

    #[test]
    fn scatter_table_is_deterministic(rows in feature_rows(24)) {
        let (gram, first) = gram_and_table(&rows);
        let kernel = gram.kernel().expect("gram should be a valid kernel");
        let second = compute_scatters(&kernel).expect("scatter should compute");
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.to_dense(), second.to_dense());
    }

    #[test]
    fn scatter_is_non_negative_zero_on_points_and_monotone(rows in feature_rows(24)) {
        let (_, table) = gram_and_table(&rows);
        let n = table.n();
        for i in 0..n {
            prop_assert_eq!(table.scatter(i, i), 0.0);
            let mut previous: f64 = 0.0;
            for j in i..n {
                let value = table.scatter(i, j);
                prop_assert!(value >= 0.0, "scatter({}, {}) = {} is negative", i, j, value);
                prop_assert!(
                    value >= previous - MONOTONE_SLACK * previous.abs().max(1.0),
                    "scatter({}, {}) = {} shrank from {}", i, j, value, previous
                );
                previous = value;
            }
        }
    }

    #[test]
    fn zero_change_points_cost_is_whole_window_scatter(rows in feature_rows(24)) {
        let (_, table) = gram_and_table(&rows);
        let n = table.n();
        let result = segment_fixed(&table, 0, 1, None, true).expect("k=0 is always feasible");
        prop_assert!(result.change_points.as_ref().is_some_and(ChangePointSet::is_empty));
        prop_assert_eq!(result.objective, table.scatter(0, n - 1));
    }

    #[test]
    fn one_segment_per_element_costs_zero(rows in feature_rows(24)) {
        let (_, table) = gram_and_table(&rows);
        let n = table.n();
        let result = segment_fixed(&table, n - 1, 1, None, true).expect("k=n-1 is feasible");
        prop_assert_eq!(result.objective, 0.0);
        let expected: Vec<usize> = (1..n).collect();
        let change_points = result.change_points.expect("boundaries requested");
        prop_assert_eq!(
            change_points.as_slice(),
            expected.as_slice()
        );
    }

    #[test]
    fn backtracked_partition_reproduces_objective(
        rows in feature_rows(24),
        k_seed in 0usize..64,
        min_len in 1usize..5,
        max_extra in prop::option::of(0usize..12),
    ) {
        let (_, table) = gram_and_table(&rows);
        let n = table.n();
        let k = k_seed % n;
        let max_segment_len = max_extra.map(|extra| min_len + extra);

        match segment_fixed(&table, k, min_len, max_segment_len, true) {
            Ok(result) => {
                let points = result.change_points.expect("boundaries requested");
                prop_assert_eq!(points.len(), k);
                assert_segment_bounds(&points, min_len, max_segment_len.unwrap_or(n).min(n));
                let rescored = table.partition_cost(&points).expect("n should match");
                prop_assert_eq!(rescored.to_bits(), result.objective.to_bits());
                prop_assert_eq!(result.cost_per_k[k], result.objective);

                let cost_only = segment_fixed(&table, k, min_len, max_segment_len, false)
                    .expect("cost-only run must agree on feasibility");
                prop_assert!(!cost_only.has_boundaries());
                prop_assert_eq!(cost_only.objective.to_bits(), result.objective.to_bits());
                prop_assert_eq!(cost_only.cost_per_k, result.cost_per_k);
            }
            Err(err) => {
                prop_assert!(err.is_infeasible(), "unexpected error: {}", err);
            }
        }
    }

    #[test]
    fn dp_matches_exhaustive_search(
        rows in feature_rows(9),
        k_seed in 0usize..16,
        min_len in 1usize..4,
        max_extra in prop::option::of(0usize..6),
    ) {
        let (_, table) = gram_and_table(&rows);
        let n = table.n();
        let k = k_seed % n;
        let max_segment_len = max_extra.map(|extra| min_len + extra);
        let effective_max = max_segment_len.unwrap_or(n).min(n);

        let expected = brute_force_min(&table, k, min_len, effective_max);
        match (segment_fixed(&table, k, min_len, max_segment_len, true), expected) {
            (Ok(result), Some(expected)) => {
                prop_assert!(
                    (result.objective - expected).abs() <= 1.0e-9,
                    "dp objective {} vs exhaustive {}", result.objective, expected
                );
            }
            (Err(err), None) => prop_assert!(err.is_infeasible(), "unexpected error: {}", err),
            (Ok(result), None) => {
                prop_assert!(false, "dp found objective {} where none exists", result.objective);
            }
            (Err(err), Some(expected)) => {
                prop_assert!(false, "dp failed with {} but exhaustive found {}", err, expected);
            }
        }
    }

    #[test]
    fn auto_selects_argmin_score_and_reports_consistent_partition(
        rows in feature_rows(24),
        max_change_points in 0usize..12,
        penalty_weight in 0.0f64..20.0,
        min_len in 1usize..4,
    ) {
        let (_, table) = gram_and_table(&rows);
        let n = table.n();

        match segment_auto(&table, max_change_points, penalty_weight, min_len, None) {
            Ok(result) => {
                let m = result.change_count;
                prop_assert_eq!(result.change_points.len(), m);
                assert_segment_bounds(&result.change_points, min_len, n);
                for (other, &score) in result.scores.iter().enumerate() {
                    if other < m {
                        prop_assert!(score > result.scores[m] || !score.is_finite());
                    } else {
                        prop_assert!(score >= result.scores[m]);
                    }
                }
                prop_assert_eq!(result.objective, result.cost_per_k[m]);
                let rescored = table.partition_cost(&result.change_points).expect("n should match");
                prop_assert_eq!(rescored.to_bits(), result.objective.to_bits());
            }
            Err(err) => {
                prop_assert!(matches!(err, KtsError::NoFeasibleSegmentation(_)), "unexpected error: {}", err);
                prop_assert!(min_len > n);
            }
        }
    }
}
