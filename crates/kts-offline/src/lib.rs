// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Kernel temporal segmentation.
//!
//! A [`ScatterTable`] is built once from an `n x n` kernel matrix; the
//! [`FixedSegmenter`] then finds the exact minimum-scatter partition for a
//! given number of change points, and the [`AutoSegmenter`] chooses that
//! number by penalized model selection.
//!
//! ```
//! use kts_core::KernelMatrix;
//! use kts_offline::{compute_scatters, segment_auto};
//!
//! let n = 6;
//! let mut values = vec![0.0; n * n];
//! for i in 0..n {
//!     for j in 0..n {
//!         if (i < 3) == (j < 3) {
//!             values[i * n + j] = 1.0;
//!         }
//!     }
//! }
//! let kernel = KernelMatrix::new(&values, n)?;
//! let scatter = compute_scatters(&kernel)?;
//! let result = segment_auto(&scatter, 3, 1.0, 1, None)?;
//! assert_eq!(result.change_points.as_slice(), &[3]);
//! # Ok::<(), kts_core::KtsError>(())
//! ```

pub mod auto;
pub mod fixed;
pub mod gram;
pub mod scatter;

pub use auto::{AutoConfig, AutoSegmentation, AutoSegmenter, complexity_penalty, segment_auto};
pub use fixed::{FixedConfig, FixedSegmentation, FixedSegmenter, segment_fixed};
pub use gram::{GramMatrix, KernelSpec, build_gram};
pub use scatter::{ScatterConfig, ScatterTable, compute_scatters};
