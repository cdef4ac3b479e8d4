// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use kts_core::{CancelToken, ExecutionContext, KernelMatrix, KtsError};
use kts_offline::{
    AutoConfig, AutoSegmenter, FixedConfig, FixedSegmenter, ScatterTable, compute_scatters,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn block_table(block_lens: &[usize]) -> ScatterTable {
    let n: usize = block_lens.iter().sum();
    let mut labels = Vec::with_capacity(n);
    for (block, &len) in block_lens.iter().enumerate() {
        labels.extend(std::iter::repeat_n(block, len));
    }
    let mut values = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            if labels[i] == labels[j] {
                values[i * n + j] = 1.0;
            }
        }
    }
    let kernel = KernelMatrix::new(&values, n).expect("block kernel should be valid");
    compute_scatters(&kernel).expect("scatter should compute")
}

#[test]
fn shared_scatter_table_gives_identical_results_across_threads() {
    const THREADS: usize = 4;
    let table = Arc::new(block_table(&[30, 45, 25, 60, 40]));
    let expected = AutoSegmenter::new(AutoConfig {
        max_change_points: 12,
        ..AutoConfig::default()
    })
    .expect("config should be valid")
    .segment(&table, &ExecutionContext::new())
    .expect("auto should succeed");

    let mut workers = Vec::with_capacity(THREADS);
    for worker_idx in 0..THREADS {
        let table = Arc::clone(&table);
        workers.push(thread::spawn(move || {
            let auto = AutoSegmenter::new(AutoConfig {
                max_change_points: 12,
                ..AutoConfig::default()
            })
            .expect("config should be valid")
            .segment(&table, &ExecutionContext::new())
            .expect("threaded auto should succeed");
            let fixed = FixedSegmenter::new(FixedConfig {
                num_change_points: 1 + worker_idx,
                ..FixedConfig::default()
            })
            .expect("config should be valid")
            .segment(&table, &ExecutionContext::new())
            .expect("threaded fixed should succeed");
            (auto, fixed)
        }));
    }

    for (worker_idx, worker) in workers.into_iter().enumerate() {
        let (auto, fixed) = worker.join().expect("thread should join cleanly");
        assert_eq!(auto.change_points, expected.change_points);
        assert_eq!(auto.cost_per_k, expected.cost_per_k);
        assert_eq!(auto.scores, expected.scores);
        assert_eq!(fixed.change_count, 1 + worker_idx);
        // Row k of the auto sweep is the fixed-count optimum for k.
        assert_eq!(fixed.objective, expected.cost_per_k[1 + worker_idx]);
    }
}

#[test]
fn scoped_threads_borrow_one_table() {
    let table = block_table(&[10, 10, 10]);
    let results: Vec<Vec<usize>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|_| {
                scope.spawn(|| {
                    FixedSegmenter::new(FixedConfig {
                        num_change_points: 2,
                        ..FixedConfig::default()
                    })
                    .expect("config should be valid")
                    .segment(&table, &ExecutionContext::new())
                    .expect("scoped fixed should succeed")
                    .change_points
                    .expect("boundaries requested")
                    .into_vec()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("scoped thread should join"))
            .collect()
    });

    for points in results {
        assert_eq!(points, vec![10, 20]);
    }
}

#[test]
fn concurrent_cancellation_stops_in_flight_segmentation() {
    let table = Arc::new(block_table(&[20, 30, 25, 25]));
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let worker_table = Arc::clone(&table);
    let worker = thread::spawn(move || {
        let ctx = ExecutionContext::new().with_cancel(&worker_cancel);
        let segmenter = AutoSegmenter::new(AutoConfig {
            max_change_points: 20,
            cancel_check_every: 1,
            ..AutoConfig::default()
        })
        .expect("config should be valid");

        let mut completed = 0usize;
        loop {
            match segmenter.segment(&worker_table, &ctx) {
                Ok(_) => {
                    completed += 1;
                    thread::sleep(Duration::from_millis(1));
                }
                Err(err) => return (completed, err),
            }
        }
    });

    thread::sleep(Duration::from_millis(30));
    let cancelled_at = Instant::now();
    cancel.cancel();

    let (completed_before_cancel, err) = worker.join().expect("worker should join");
    let cancellation_latency_ms = cancelled_at.elapsed().as_millis();

    assert!(completed_before_cancel > 0);
    assert_eq!(err, KtsError::Cancelled);
    assert!(
        cancellation_latency_ms <= 2_000,
        "expected prompt cancellation, got {cancellation_latency_ms} ms"
    );
}

#[cfg(feature = "rayon")]
#[test]
fn parallel_rows_match_polled_serial_rows_bit_for_bit() {
    let n = 90;
    let mut values = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            let same_block = i * 4 / n == j * 4 / n;
            let decay = 1.0 / (1.0 + i.abs_diff(j) as f64);
            values[i * n + j] = if same_block {
                0.5 + 0.5 * decay
            } else {
                0.5 * decay
            };
        }
    }
    let kernel = KernelMatrix::new(&values, n).expect("decay kernel should be valid");
    let table = compute_scatters(&kernel).expect("scatter should compute");

    let cancel = CancelToken::new();
    let polled = ExecutionContext::new().with_cancel(&cancel);
    let unpolled = ExecutionContext::new();

    let fixed = FixedSegmenter::new(FixedConfig {
        num_change_points: 6,
        min_segment_len: 3,
        max_segment_len: Some(40),
        ..FixedConfig::default()
    })
    .expect("config should be valid");
    let serial = fixed.segment(&table, &polled).expect("serial fixed should succeed");
    let parallel = fixed
        .segment(&table, &unpolled)
        .expect("parallel fixed should succeed");
    assert!(serial.diagnostics.thread_count.is_none());
    assert!(parallel.diagnostics.thread_count.is_some());
    assert_eq!(serial.objective.to_bits(), parallel.objective.to_bits());
    assert_eq!(
        serial.cost_per_k.iter().map(|cost| cost.to_bits()).collect::<Vec<_>>(),
        parallel.cost_per_k.iter().map(|cost| cost.to_bits()).collect::<Vec<_>>()
    );
    assert_eq!(serial.change_points, parallel.change_points);

    let auto = AutoSegmenter::new(AutoConfig {
        max_change_points: 15,
        min_segment_len: 2,
        ..AutoConfig::default()
    })
    .expect("config should be valid");
    let serial = auto.segment(&table, &polled).expect("serial auto should succeed");
    let parallel = auto
        .segment(&table, &unpolled)
        .expect("parallel auto should succeed");
    assert_eq!(serial.change_points, parallel.change_points);
    assert_eq!(
        serial.scores.iter().map(|score| score.to_bits()).collect::<Vec<_>>(),
        parallel.scores.iter().map(|score| score.to_bits()).collect::<Vec<_>>()
    );
}
