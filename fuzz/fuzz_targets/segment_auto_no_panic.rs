// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

use kts_core::{CancelToken, ExecutionContext, KernelMatrix};
use kts_offline::{
    AutoConfig, AutoSegmenter, FixedConfig, FixedSegmenter, KernelSpec, build_gram,
    compute_scatters,
};
use libfuzzer_sys::fuzz_target;

struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn next_u8(&mut self) -> u8 {
        let value = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos = self.pos.saturating_add(1);
        value
    }

    fn next_i16(&mut self) -> i16 {
        i16::from_le_bytes([self.next_u8(), self.next_u8()])
    }
}

fn bounded(seed: u8, lo: usize, hi: usize) -> usize {
    lo + usize::from(seed) % (hi - lo + 1)
}

fn build_kernel_spec(kind_seed: u8, gamma_seed: u8) -> KernelSpec {
    match kind_seed % 4 {
        0 => KernelSpec::Linear,
        1 => KernelSpec::Cosine,
        2 => KernelSpec::Rbf { gamma: None },
        _ => KernelSpec::Rbf {
            gamma: Some(f64::from(gamma_seed) / 64.0),
        },
    }
}

fuzz_target!(|data: &[u8]| {
    let mut cursor = ByteCursor::new(data);

    let n = bounded(cursor.next_u8(), 1, 48);
    let d = bounded(cursor.next_u8(), 1, 4);
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|_| (0..d).map(|_| f64::from(cursor.next_i16()) / 64.0).collect())
        .collect();

    let spec = build_kernel_spec(cursor.next_u8(), cursor.next_u8());
    let Ok(gram) = build_gram(&rows, &spec) else {
        return;
    };
    let Ok(kernel) = gram.kernel() else {
        return;
    };
    let Ok(table) = compute_scatters(&kernel) else {
        return;
    };

    let min_segment_len = bounded(cursor.next_u8(), 1, 8);
    let max_segment_len = match cursor.next_u8() % 3 {
        0 => None,
        _ => Some(min_segment_len + usize::from(cursor.next_u8() % 64)),
    };

    let cancel = CancelToken::new();
    if cursor.next_u8() % 16 == 0 {
        cancel.cancel();
    }
    let ctx = ExecutionContext::new().with_cancel(&cancel);

    if let Ok(segmenter) = FixedSegmenter::new(FixedConfig {
        num_change_points: usize::from(cursor.next_u8()) % (n + 2),
        min_segment_len,
        max_segment_len,
        backtrack: cursor.next_u8() & 1 == 0,
        cancel_check_every: usize::from(cursor.next_u8()),
    }) && let Ok(result) = segmenter.segment(&table, &ctx)
        && let Some(points) = result.change_points.as_ref()
    {
        let rescored = table
            .partition_cost(points)
            .expect("backtracked partition must match n");
        assert_eq!(rescored.to_bits(), result.objective.to_bits());
    }

    if let Ok(segmenter) = AutoSegmenter::new(AutoConfig {
        max_change_points: usize::from(cursor.next_u8()),
        penalty_weight: f64::from(cursor.next_u8()) / 8.0,
        min_segment_len,
        max_segment_len,
        desc_rate: bounded(cursor.next_u8(), 1, 30),
        cancel_check_every: usize::from(cursor.next_u8()),
    }) && let Ok(result) = segmenter.segment(&table, &ctx)
    {
        assert_eq!(result.change_points.len(), result.change_count);
        assert!(result.scores[result.change_count].is_finite());
    }

    // Raw kernels straight from bytes, including asymmetric ones.
    let side = bounded(cursor.next_u8(), 1, 12);
    let values: Vec<f64> = (0..side * side)
        .map(|_| f64::from(cursor.next_i16()) / 256.0)
        .collect();
    if let Ok(raw) = KernelMatrix::new(&values, side) {
        let _ = compute_scatters(&raw);
    }
});
