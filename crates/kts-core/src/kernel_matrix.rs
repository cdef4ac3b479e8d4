// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::KtsError;

/// Default relative tolerance for [`SymmetryCheck::Tolerance`].
pub const DEFAULT_SYMMETRY_TOLERANCE: f64 = 1.0e-9;

/// How strictly kernel symmetry is verified before use.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SymmetryCheck {
    /// Trust the caller; skips the `O(n^2)` scan.
    Skip,
    /// Require `|K[i][j] - K[j][i]| <= tol * max(1, |K[i][j]|, |K[j][i]|)`.
    Tolerance(f64),
}

impl Default for SymmetryCheck {
    fn default() -> Self {
        Self::Tolerance(DEFAULT_SYMMETRY_TOLERANCE)
    }
}

/// Read-only row-major view of an `n x n` kernel (similarity) matrix.
///
/// Entry `(i, j)` is the similarity between sequence positions `i` and `j`,
/// typically the Gram matrix `F * F^T` of per-frame descriptors.
#[derive(Clone, Copy, Debug)]
pub struct KernelMatrix<'a> {
    values: &'a [f64],
    n: usize,
}

impl<'a> KernelMatrix<'a> {
    /// Wraps `values` as an `n x n` matrix.
    ///
    /// Fails when `n == 0`, when `values.len() != n * n`, or when any entry
    /// is non-finite. Symmetry is checked separately, see
    /// [`KernelMatrix::check_symmetry`].
    pub fn new(values: &'a [f64], n: usize) -> Result<Self, KtsError> {
        if n == 0 {
            return Err(KtsError::invalid_input("kernel matrix requires n >= 1; got 0"));
        }
        let expected = n.checked_mul(n).ok_or_else(|| {
            KtsError::resource_limit(format!("kernel matrix size overflow for n={n}"))
        })?;
        if values.len() != expected {
            return Err(KtsError::invalid_input(format!(
                "kernel matrix must be square: n={n} expects {expected} values, got {}",
                values.len()
            )));
        }
        if let Some(idx) = values.iter().position(|value| !value.is_finite()) {
            return Err(KtsError::invalid_input(format!(
                "kernel matrix entry ({}, {}) is non-finite: {}",
                idx / n,
                idx % n,
                values[idx]
            )));
        }
        Ok(Self { values, n })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n + col]
    }

    pub fn row(&self, row: usize) -> &'a [f64] {
        &self.values[row * self.n..(row + 1) * self.n]
    }

    /// Largest absolute difference `|K[i][j] - K[j][i]|` over all pairs.
    pub fn max_asymmetry(&self) -> f64 {
        let mut worst = 0.0_f64;
        for row in 0..self.n {
            for col in row + 1..self.n {
                worst = worst.max((self.get(row, col) - self.get(col, row)).abs());
            }
        }
        worst
    }

    /// Verifies symmetry according to `check`.
    pub fn check_symmetry(&self, check: SymmetryCheck) -> Result<(), KtsError> {
        let tolerance = match check {
            SymmetryCheck::Skip => return Ok(()),
            SymmetryCheck::Tolerance(tolerance) => tolerance,
        };
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(KtsError::invalid_input(format!(
                "symmetry tolerance must be finite and >= 0; got {tolerance}"
            )));
        }

        for row in 0..self.n {
            for col in row + 1..self.n {
                let upper = self.get(row, col);
                let lower = self.get(col, row);
                let scale = 1.0_f64.max(upper.abs()).max(lower.abs());
                if (upper - lower).abs() > tolerance * scale {
                    return Err(KtsError::invalid_input(format!(
                        "kernel matrix is not symmetric at ({row}, {col}): {upper} vs {lower}, tolerance={tolerance}, max_asymmetry={}",
                        self.max_asymmetry()
                    )));
                }
            }
        }
        Ok(())
    }
}
