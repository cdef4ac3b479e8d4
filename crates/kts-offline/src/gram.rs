// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use kts_core::{KernelMatrix, KtsError};
use tracing::debug;

/// Kernel choices for [`build_gram`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub enum KernelSpec {
    /// Dot product of the raw descriptors.
    #[default]
    Linear,
    /// Dot product of L2-normalized descriptors; zero rows stay zero.
    Cosine,
    /// Radial basis function kernel.
    ///
    /// If `gamma` is `None`, it is resolved as `1 / (2 * mean squared distance)`
    /// over distinct pairs.
    Rbf { gamma: Option<f64> },
}

#[derive(Clone, Debug)]
enum ResolvedKernel {
    Linear,
    Rbf { gamma: f64 },
}

/// Owned `n x n` kernel matrix built from descriptor rows.
#[derive(Clone, Debug, PartialEq)]
pub struct GramMatrix {
    values: Vec<f64>,
    n: usize,
    notes: Vec<String>,
}

impl GramMatrix {
    /// Wraps an existing row-major buffer after validating its shape.
    pub fn from_values(values: Vec<f64>, n: usize) -> Result<Self, KtsError> {
        KernelMatrix::new(&values, n)?;
        Ok(Self {
            values,
            n,
            notes: vec![],
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Notes recorded while resolving the kernel (e.g. the automatic RBF gamma).
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn kernel(&self) -> Result<KernelMatrix<'_>, KtsError> {
        KernelMatrix::new(&self.values, self.n)
    }
}

fn validate_rows(rows: &[Vec<f64>]) -> Result<usize, KtsError> {
    let Some(first) = rows.first() else {
        return Err(KtsError::invalid_input("build_gram requires at least one row"));
    };
    let d = first.len();
    if d == 0 {
        return Err(KtsError::invalid_input("build_gram requires rows with d >= 1"));
    }
    for (row_idx, row) in rows.iter().enumerate() {
        if row.len() != d {
            return Err(KtsError::invalid_input(format!(
                "row {row_idx} has width {}, expected {d}",
                row.len()
            )));
        }
        if let Some(dim) = row.iter().position(|value| !value.is_finite()) {
            return Err(KtsError::invalid_input(format!(
                "non-finite descriptor value at row={row_idx}, dim={dim}"
            )));
        }
    }
    Ok(d)
}

fn l2_normalized(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| {
            let norm = row.iter().map(|value| value * value).sum::<f64>().sqrt();
            if norm > 0.0 {
                row.iter().map(|value| value / norm).collect()
            } else {
                row.clone()
            }
        })
        .collect()
}

fn resolve_rbf_gamma(
    gamma: Option<f64>,
    rows: &[Vec<f64>],
    d: usize,
) -> Result<(f64, Option<String>), KtsError> {
    if let Some(gamma) = gamma {
        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(KtsError::invalid_input(format!(
                "KernelSpec::Rbf gamma must be finite and > 0; got {gamma}"
            )));
        }
        return Ok((gamma, None));
    }

    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for left in 0..rows.len() {
        for right in left + 1..rows.len() {
            let dist_sq = squared_distance(&rows[left], &rows[right]);
            if dist_sq.is_finite() && dist_sq > 0.0 {
                sum_sq += dist_sq;
                count = count.saturating_add(1);
            }
        }
    }

    let fallback = (d as f64).max(1.0);
    let avg_sq = if count > 0 { sum_sq / count as f64 } else { 0.0 };
    let gamma = if avg_sq > 0.0 {
        1.0 / (2.0 * avg_sq)
    } else {
        1.0 / (2.0 * fallback)
    };
    Ok((gamma, Some(format!("kernel.rbf.gamma_auto={gamma}"))))
}

fn squared_distance(left: &[f64], right: &[f64]) -> f64 {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| {
            let delta = a - b;
            delta * delta
        })
        .sum()
}

fn kernel_value(kernel: &ResolvedKernel, left: &[f64], right: &[f64]) -> f64 {
    match kernel {
        ResolvedKernel::Linear => left.iter().zip(right.iter()).map(|(a, b)| a * b).sum(),
        ResolvedKernel::Rbf { gamma } => (-gamma * squared_distance(left, right)).exp(),
    }
}

/// Builds the Gram matrix `K[i][j] = k(rows[i], rows[j])`.
///
/// Only the upper triangle is evaluated; the result is exactly symmetric.
pub fn build_gram(rows: &[Vec<f64>], spec: &KernelSpec) -> Result<GramMatrix, KtsError> {
    let d = validate_rows(rows)?;
    let n = rows.len();
    let cells = n
        .checked_mul(n)
        .ok_or_else(|| KtsError::resource_limit(format!("gram size overflow for n={n}")))?;

    let mut notes = vec![];
    let normalized;
    let (kernel, source) = match spec {
        KernelSpec::Linear => (ResolvedKernel::Linear, rows),
        KernelSpec::Cosine => {
            normalized = l2_normalized(rows);
            (ResolvedKernel::Linear, normalized.as_slice())
        }
        KernelSpec::Rbf { gamma } => {
            let (gamma, note) = resolve_rbf_gamma(*gamma, rows, d)?;
            notes.extend(note);
            (ResolvedKernel::Rbf { gamma }, rows)
        }
    };

    let mut values = vec![0.0; cells];
    for left in 0..n {
        for right in left..n {
            let value = kernel_value(&kernel, &source[left], &source[right]);
            if !value.is_finite() {
                return Err(KtsError::numerical_issue(format!(
                    "non-finite kernel value at ({left}, {right})"
                )));
            }
            values[left * n + right] = value;
            values[right * n + left] = value;
        }
    }

    debug!(n, d, kernel = ?spec, "built gram matrix");
    Ok(GramMatrix { values, n, notes })
}
