// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors surfaced by kernel segmentation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum KtsError {
    /// Malformed matrix or out-of-range parameter. Not retryable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The requested change-point count cannot satisfy the segment length bounds.
    #[error(
        "infeasible: {change_points} change points cannot partition n={n} under min_segment_len={min_segment_len}, max_segment_len={max_segment_len}"
    )]
    Infeasible {
        change_points: usize,
        n: usize,
        min_segment_len: usize,
        max_segment_len: usize,
    },
    /// Every count in the searched range is infeasible.
    #[error("no feasible segmentation: {0}")]
    NoFeasibleSegmentation(String),
    #[error("numerical issue: {0}")]
    NumericalIssue(String),
    #[error("resource limit: {0}")]
    ResourceLimit(String),
    #[error("cancelled")]
    Cancelled,
}

impl KtsError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn no_feasible_segmentation(message: impl Into<String>) -> Self {
        Self::NoFeasibleSegmentation(message.into())
    }

    pub fn numerical_issue(message: impl Into<String>) -> Self {
        Self::NumericalIssue(message.into())
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::ResourceLimit(message.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    /// True for errors a model-selection loop may skip over.
    pub fn is_infeasible(&self) -> bool {
        matches!(self, Self::Infeasible { .. })
    }
}
