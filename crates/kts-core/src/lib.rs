// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Core shared types for kernel temporal segmentation.

pub mod control;
pub mod diagnostics;
pub mod error;
pub mod execution_context;
pub mod kernel_matrix;
pub mod observability;
pub mod results;

pub use control::CancelToken;
pub use diagnostics::{DIAGNOSTICS_SCHEMA_VERSION, Diagnostics, SweepStats};
pub use error::KtsError;
pub use execution_context::ExecutionContext;
pub use kernel_matrix::{DEFAULT_SYMMETRY_TOLERANCE, KernelMatrix, SymmetryCheck};
pub use observability::{ProgressSink, TelemetrySink};
pub use results::{ChangePointSet, validate_change_points};
