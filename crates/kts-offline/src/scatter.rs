// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use kts_core::{ChangePointSet, KernelMatrix, KtsError, SymmetryCheck};
use std::mem::size_of;
use tracing::{debug, warn};

const LARGE_TABLE_WARNING_BYTES: usize = 256 * 1024 * 1024;
const ROUNDING_TOLERANCE: f64 = 1.0e-9;

/// Configuration for [`ScatterTable::compute`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScatterConfig {
    pub symmetry: SymmetryCheck,
}

/// Within-segment scatter of every contiguous window of a kernel matrix.
///
/// For a segment `[start, end)` of length `m` the scatter is
/// `sum_p K[p][p] - (1/m) * sum_{p,q} K[p][q]`, the sum of squared
/// distances to the segment mean in feature space. Lookups are `O(1)`
/// from a diagonal prefix sum and a 2-D prefix sum built in `O(n^2)`.
///
/// The table is immutable once built and can be shared across threads.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterTable {
    n: usize,
    prefix: Vec<f64>,
    diag_prefix: Vec<f64>,
}

/// Builds a [`ScatterTable`] with the default symmetry check.
pub fn compute_scatters(kernel: &KernelMatrix<'_>) -> Result<ScatterTable, KtsError> {
    ScatterTable::compute(kernel, &ScatterConfig::default())
}

fn estimate_table_bytes(n: usize) -> Result<usize, KtsError> {
    let side = n
        .checked_add(1)
        .ok_or_else(|| KtsError::resource_limit("scatter table side overflow"))?;
    side.checked_mul(side)
        .and_then(|cells| cells.checked_add(side))
        .and_then(|cells| cells.checked_mul(size_of::<f64>()))
        .ok_or_else(|| KtsError::resource_limit(format!("scatter table bytes overflow for n={n}")))
}

impl ScatterTable {
    pub fn compute(kernel: &KernelMatrix<'_>, config: &ScatterConfig) -> Result<Self, KtsError> {
        kernel.check_symmetry(config.symmetry)?;

        let n = kernel.n();
        let bytes = estimate_table_bytes(n)?;
        if bytes >= LARGE_TABLE_WARNING_BYTES {
            warn!(n, bytes, "scatter table allocation is large");
        }

        let side = n + 1;
        let mut prefix = vec![0.0; side * side];
        for row in 0..n {
            let values = kernel.row(row);
            for col in 0..n {
                let idx = (row + 1) * side + (col + 1);
                prefix[idx] = values[col]
                    + prefix[row * side + (col + 1)]
                    + prefix[(row + 1) * side + col]
                    - prefix[row * side + col];
            }
        }

        let mut diag_prefix = vec![0.0; side];
        for i in 0..n {
            diag_prefix[i + 1] = diag_prefix[i] + kernel.get(i, i);
        }

        if let Some(idx) = prefix.iter().position(|value| !value.is_finite()) {
            return Err(KtsError::numerical_issue(format!(
                "non-finite kernel prefix sum at ({}, {})",
                idx / side,
                idx % side
            )));
        }
        if diag_prefix.iter().any(|value| !value.is_finite()) {
            return Err(KtsError::numerical_issue("non-finite kernel diagonal prefix sum"));
        }

        debug!(n, bytes, "computed scatter table");
        Ok(Self {
            n,
            prefix,
            diag_prefix,
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Approximate heap footprint of the table.
    pub fn memory_bytes(&self) -> usize {
        (self.prefix.len() + self.diag_prefix.len()) * size_of::<f64>()
    }

    #[inline]
    fn block_sum(&self, start: usize, end: usize) -> f64 {
        let side = self.n + 1;
        self.prefix[end * side + end]
            - self.prefix[start * side + end]
            - self.prefix[end * side + start]
            + self.prefix[start * side + start]
    }

    /// Scatter of the half-open segment `[start, end)`.
    ///
    /// Requires `start < end <= n`. Single-point segments are exactly zero.
    #[inline]
    pub fn segment_cost(&self, start: usize, end: usize) -> f64 {
        debug_assert!(start < end && end <= self.n, "segment [{start}, {end}) out of range");
        let len = end - start;
        if len == 1 {
            return 0.0;
        }

        let diag_sum = self.diag_prefix[end] - self.diag_prefix[start];
        let cost = diag_sum - self.block_sum(start, end) / len as f64;
        if cost < 0.0 && cost >= -ROUNDING_TOLERANCE * diag_sum.abs().max(1.0) {
            return 0.0;
        }
        cost
    }

    /// Scatter of the inclusive window `i..=j`.
    #[inline]
    pub fn scatter(&self, i: usize, j: usize) -> f64 {
        self.segment_cost(i, j + 1)
    }

    /// Bounds-checked [`ScatterTable::scatter`].
    pub fn try_scatter(&self, i: usize, j: usize) -> Result<f64, KtsError> {
        if i > j || j >= self.n {
            return Err(KtsError::invalid_input(format!(
                "scatter window requires 0 <= i <= j < n={}; got i={i}, j={j}",
                self.n
            )));
        }
        Ok(self.scatter(i, j))
    }

    /// Total scatter of the partition implied by `change_points`.
    ///
    /// Segments are summed left to right, the same order the DP accumulates
    /// them, so the result reproduces a reported objective bit for bit.
    pub fn partition_cost(&self, change_points: &ChangePointSet) -> Result<f64, KtsError> {
        if change_points.n() != self.n {
            return Err(KtsError::invalid_input(format!(
                "change point set has n={}, scatter table has n={}",
                change_points.n(),
                self.n
            )));
        }
        Ok(change_points
            .segments()
            .fold(0.0, |total, (start, end)| total + self.segment_cost(start, end)))
    }

    /// Row-major `n x n` matrix with `scatter(i, j)` in the upper triangle and
    /// zeros below the diagonal.
    pub fn to_dense(&self) -> Vec<f64> {
        let n = self.n;
        let mut dense = vec![0.0; n * n];
        for i in 0..n {
            for j in i..n {
                dense[i * n + j] = self.scatter(i, j);
            }
        }
        dense
    }
}
