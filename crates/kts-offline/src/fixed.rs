// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::scatter::ScatterTable;
use kts_core::{ChangePointSet, Diagnostics, ExecutionContext, KtsError, SweepStats};
use std::borrow::Cow;
use std::mem::size_of;
use std::time::Instant;
use tracing::debug;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

pub(crate) const DEFAULT_CANCEL_CHECK_EVERY: usize = 256;

/// Configuration for [`FixedSegmenter`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct FixedConfig {
    pub num_change_points: usize,
    /// Minimum number of elements per segment.
    pub min_segment_len: usize,
    /// Maximum number of elements per segment; `None` means `n`.
    pub max_segment_len: Option<usize>,
    /// Recover boundaries; `false` reports costs only and skips the
    /// backpointer table.
    pub backtrack: bool,
    /// DP endpoints evaluated between cancellation/time-budget polls.
    pub cancel_check_every: usize,
}

impl Default for FixedConfig {
    fn default() -> Self {
        Self {
            num_change_points: 1,
            min_segment_len: 1,
            max_segment_len: None,
            backtrack: true,
            cancel_check_every: DEFAULT_CANCEL_CHECK_EVERY,
        }
    }
}

impl FixedConfig {
    fn validate(&self) -> Result<(), KtsError> {
        validate_length_bounds(self.min_segment_len, self.max_segment_len)
    }

    fn normalized_cancel_check_every(&self) -> usize {
        self.cancel_check_every.max(1)
    }
}

pub(crate) fn validate_length_bounds(
    min_segment_len: usize,
    max_segment_len: Option<usize>,
) -> Result<(), KtsError> {
    if min_segment_len == 0 {
        return Err(KtsError::invalid_input("min_segment_len must be >= 1; got 0"));
    }
    if let Some(max_segment_len) = max_segment_len
        && max_segment_len < min_segment_len
    {
        return Err(KtsError::invalid_input(format!(
            "max_segment_len={max_segment_len} must be >= min_segment_len={min_segment_len}"
        )));
    }
    Ok(())
}

/// Segment length bounds resolved against a concrete `n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LengthBounds {
    pub(crate) min_len: usize,
    pub(crate) max_len: usize,
}

impl LengthBounds {
    /// `max_segment_len` defaults to `n` and is clamped to it.
    pub(crate) fn resolve(
        n: usize,
        min_segment_len: usize,
        max_segment_len: Option<usize>,
    ) -> Result<(Self, Option<String>), KtsError> {
        validate_length_bounds(min_segment_len, max_segment_len)?;
        let requested = max_segment_len.unwrap_or(n);
        let warning = (requested > n).then(|| {
            format!("max_segment_len={requested} exceeds n={n}; clamped to {n}")
        });
        Ok((
            Self {
                min_len: min_segment_len,
                max_len: requested.min(n),
            },
            warning,
        ))
    }
}

/// Result of a fixed-count segmentation.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct FixedSegmentation {
    pub n: usize,
    pub change_count: usize,
    /// Minimum total scatter `I[K][n]`.
    pub objective: f64,
    /// `I[k][n]` for `k = 0..=K`; `f64::INFINITY` marks infeasible counts.
    pub cost_per_k: Vec<f64>,
    /// `None` when the run was cost-only (`backtrack = false`).
    pub change_points: Option<ChangePointSet>,
    pub diagnostics: Diagnostics,
}

impl FixedSegmentation {
    pub fn has_boundaries(&self) -> bool {
        self.change_points.is_some()
    }
}

/// Exact dynamic-programming segmenter for a fixed number of change points.
#[derive(Debug)]
pub struct FixedSegmenter {
    config: FixedConfig,
}

impl FixedSegmenter {
    pub fn new(config: FixedConfig) -> Result<Self, KtsError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FixedConfig {
        &self.config
    }

    pub fn segment(
        &self,
        scatter: &ScatterTable,
        ctx: &ExecutionContext<'_>,
    ) -> Result<FixedSegmentation, KtsError> {
        self.config.validate()?;

        let n = scatter.n();
        let k = self.config.num_change_points;
        if k >= n {
            return Err(KtsError::invalid_input(format!("num_change_points={k} must be < n={n}")));
        }
        let (bounds, clamp_warning) =
            LengthBounds::resolve(n, self.config.min_segment_len, self.config.max_segment_len)?;

        let started_at = Instant::now();
        let mut stats = SweepStats::default();
        let sweep = run_sweep(
            scatter,
            k,
            bounds,
            self.config.backtrack,
            self.config.normalized_cancel_check_every(),
            ctx,
            started_at,
            &mut stats,
        )?;

        let objective = sweep.cost_per_k[k];
        if !objective.is_finite() {
            return Err(KtsError::Infeasible {
                change_points: k,
                n,
                min_segment_len: bounds.min_len,
                max_segment_len: bounds.max_len,
            });
        }

        let change_points = if self.config.backtrack {
            Some(backtrack_change_points(&sweep, k)?)
        } else {
            None
        };

        let runtime_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        ctx.record_scalar("offline.kts.rows_filled", stats.rows_filled as f64);
        ctx.record_scalar(
            "offline.kts.transitions_considered",
            stats.transitions_considered as f64,
        );
        ctx.record_scalar("offline.kts.runtime_ms", runtime_ms as f64);
        ctx.report_progress(1.0);

        debug!(n, k, objective, backtrack = self.config.backtrack, "fixed-count segmentation done");

        let mut notes = vec![
            format!("num_change_points={k}"),
            format!(
                "min_segment_len={}, max_segment_len={}",
                bounds.min_len, bounds.max_len
            ),
            format!("objective={objective}"),
        ];
        if !self.config.backtrack {
            notes.push("backtrack=false; boundaries omitted".to_string());
        }

        let diagnostics = Diagnostics {
            n,
            runtime_ms: Some(runtime_ms),
            notes,
            warnings: clamp_warning.into_iter().collect(),
            algorithm: Cow::Borrowed("kts_fixed"),
            thread_count: sweep.thread_count,
            sweep_stats: Some(stats),
            #[cfg(feature = "serde")]
            params_json: serde_json::to_value(&self.config).ok(),
            ..Diagnostics::default()
        };

        Ok(FixedSegmentation {
            n,
            change_count: k,
            objective,
            cost_per_k: sweep.cost_per_k,
            change_points,
            diagnostics,
        })
    }
}

/// Optimal partition of `scatter` with exactly `num_change_points` boundaries.
///
/// Fails with [`KtsError::Infeasible`] when the length bounds admit no such
/// partition.
pub fn segment_fixed(
    scatter: &ScatterTable,
    num_change_points: usize,
    min_segment_len: usize,
    max_segment_len: Option<usize>,
    backtrack: bool,
) -> Result<FixedSegmentation, KtsError> {
    let segmenter = FixedSegmenter::new(FixedConfig {
        num_change_points,
        min_segment_len,
        max_segment_len,
        backtrack,
        ..FixedConfig::default()
    })?;
    segmenter.segment(scatter, &ExecutionContext::new())
}

/// Costs `I[k][n]` and, optionally, backpointers of one DP sweep.
#[derive(Clone, Debug)]
pub(crate) struct DpSweep {
    pub(crate) n: usize,
    pub(crate) cost_per_k: Vec<f64>,
    /// Flat `(max_k + 1) x (n + 1)`; `usize::MAX` marks unreachable states.
    backpointers: Option<Vec<usize>>,
    pub(crate) thread_count: Option<usize>,
}

#[derive(Clone, Copy, Debug)]
struct Transition {
    best: Option<(f64, usize)>,
    considered: usize,
}

fn checked_usize_mul(lhs: usize, rhs: usize, context: &str) -> Result<usize, KtsError> {
    lhs.checked_mul(rhs)
        .ok_or_else(|| KtsError::resource_limit(format!("{context} overflow")))
}

fn checked_usize_add(lhs: usize, rhs: usize, context: &str) -> Result<usize, KtsError> {
    lhs.checked_add(rhs)
        .ok_or_else(|| KtsError::resource_limit(format!("{context} overflow")))
}

pub(crate) fn estimate_sweep_state_bytes(
    n: usize,
    max_k: usize,
    backtrack: bool,
) -> Result<usize, KtsError> {
    let side = checked_usize_add(n, 1, "dp row length")?;
    let rows = checked_usize_add(max_k, 1, "dp row count")?;

    let dp_cells = checked_usize_mul(side, 2, "dp cell count")?;
    let dp_bytes = checked_usize_mul(dp_cells, size_of::<f64>(), "dp bytes")?;
    let cost_bytes = checked_usize_mul(rows, size_of::<f64>(), "cost bytes")?;
    let base = checked_usize_add(dp_bytes, cost_bytes, "dp state bytes")?;
    if !backtrack {
        return Ok(base);
    }

    let backpointer_cells = checked_usize_mul(rows, side, "backpointer cell count")?;
    let backpointer_bytes =
        checked_usize_mul(backpointer_cells, size_of::<usize>(), "backpointer bytes")?;
    checked_usize_add(base, backpointer_bytes, "dp state bytes")
}

/// Best split `t` for state `(k, l)`, `k >= 1`.
///
/// Candidates need `l - t` within the length bounds, `t >= k * min_len` and a
/// finite `prev[t]`; ties go to the smallest `t`.
fn best_transition(
    scatter: &ScatterTable,
    prev: &[f64],
    k: usize,
    l: usize,
    bounds: LengthBounds,
) -> Result<Transition, KtsError> {
    let t_lo = (k * bounds.min_len).max(l.saturating_sub(bounds.max_len));
    let t_hi = l - bounds.min_len;

    let mut best_objective = f64::INFINITY;
    let mut best_split = usize::MAX;
    let mut considered = 0usize;
    for t in t_lo..=t_hi {
        if !prev[t].is_finite() {
            continue;
        }
        considered += 1;
        let objective = prev[t] + scatter.segment_cost(t, l);
        if !objective.is_finite() {
            return Err(KtsError::numerical_issue(format!(
                "non-finite dp objective at k={k}, split={t}, end={l}"
            )));
        }
        if objective < best_objective {
            best_objective = objective;
            best_split = t;
        }
    }

    Ok(Transition {
        best: (best_split != usize::MAX).then_some((best_objective, best_split)),
        considered,
    })
}

fn check_runtime_controls(
    iteration: usize,
    cancel_check_every: usize,
    ctx: &ExecutionContext<'_>,
    started_at: Instant,
) -> Result<(), KtsError> {
    if iteration.is_multiple_of(cancel_check_every) {
        ctx.check_cancelled()?;
        ctx.check_time_budget(started_at)?;
    }
    Ok(())
}

#[cfg(feature = "rayon")]
fn can_use_parallel(ctx: &ExecutionContext<'_>) -> bool {
    ctx.is_unpolled()
}

#[cfg(not(feature = "rayon"))]
fn can_use_parallel(_ctx: &ExecutionContext<'_>) -> bool {
    false
}

#[cfg(feature = "rayon")]
fn row_transitions_parallel(
    scatter: &ScatterTable,
    prev: &[f64],
    k: usize,
    first_l: usize,
    bounds: LengthBounds,
) -> Result<Vec<Transition>, KtsError> {
    (first_l..=scatter.n())
        .into_par_iter()
        .map(|l| best_transition(scatter, prev, k, l, bounds))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn row_transitions_parallel(
    _scatter: &ScatterTable,
    _prev: &[f64],
    _k: usize,
    _first_l: usize,
    _bounds: LengthBounds,
) -> Result<Vec<Transition>, KtsError> {
    Err(KtsError::invalid_input("parallel dp rows require the `rayon` feature"))
}

#[allow(clippy::too_many_arguments)]
fn row_transitions_serial(
    scatter: &ScatterTable,
    prev: &[f64],
    k: usize,
    first_l: usize,
    bounds: LengthBounds,
    cancel_check_every: usize,
    ctx: &ExecutionContext<'_>,
    started_at: Instant,
    iteration: &mut usize,
) -> Result<Vec<Transition>, KtsError> {
    let mut out = Vec::with_capacity(scatter.n() + 1 - first_l);
    for l in first_l..=scatter.n() {
        *iteration = iteration.saturating_add(1);
        check_runtime_controls(*iteration, cancel_check_every, ctx, started_at)?;
        out.push(best_transition(scatter, prev, k, l, bounds)?);
    }
    Ok(out)
}

/// Fills `I[k][l]` for `k = 0..=max_k` keeping two rolling rows.
///
/// Rows are independent given the previous one, so each row is a natural
/// cancellation checkpoint and, with `rayon`, is filled in parallel.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_sweep(
    scatter: &ScatterTable,
    max_k: usize,
    bounds: LengthBounds,
    backtrack: bool,
    cancel_check_every: usize,
    ctx: &ExecutionContext<'_>,
    started_at: Instant,
    stats: &mut SweepStats,
) -> Result<DpSweep, KtsError> {
    let n = scatter.n();
    if max_k >= n {
        return Err(KtsError::invalid_input(format!("max_k={max_k} must be < n={n}")));
    }
    let required_bytes = estimate_sweep_state_bytes(n, max_k, backtrack)?;
    ctx.check_memory_budget(required_bytes, "kts dp state")?;

    let side = n + 1;
    let inf = f64::INFINITY;
    let mut cost_per_k = vec![inf; max_k + 1];
    let mut backpointers = backtrack.then(|| vec![usize::MAX; (max_k + 1) * side]);
    let parallel = can_use_parallel(ctx);

    let mut prev = vec![inf; side];
    prev[0] = 0.0;
    for l in bounds.min_len..=bounds.max_len {
        prev[l] = scatter.segment_cost(0, l);
        stats.scatter_lookups = stats.scatter_lookups.saturating_add(1);
    }
    cost_per_k[0] = prev[n];
    stats.rows_filled = stats.rows_filled.saturating_add(1);

    let mut curr = vec![inf; side];
    let mut iteration = 0usize;
    for k in 1..=max_k {
        ctx.check_cancelled()?;
        ctx.check_time_budget(started_at)?;

        curr.fill(inf);
        let first_l = k
            .checked_add(1)
            .and_then(|segments| segments.checked_mul(bounds.min_len))
            .unwrap_or(usize::MAX);
        if first_l > n {
            // Every later row is unreachable as well.
            break;
        }

        let transitions = if parallel {
            row_transitions_parallel(scatter, &prev, k, first_l, bounds)?
        } else {
            row_transitions_serial(
                scatter,
                &prev,
                k,
                first_l,
                bounds,
                cancel_check_every,
                ctx,
                started_at,
                &mut iteration,
            )?
        };

        let mut any_finite = false;
        for (offset, transition) in transitions.into_iter().enumerate() {
            stats.transitions_considered = stats
                .transitions_considered
                .saturating_add(transition.considered);
            stats.scatter_lookups = stats.scatter_lookups.saturating_add(transition.considered);
            if let Some((objective, split)) = transition.best {
                let l = first_l + offset;
                curr[l] = objective;
                any_finite = true;
                if let Some(table) = backpointers.as_mut() {
                    table[k * side + l] = split;
                }
            }
        }

        cost_per_k[k] = curr[n];
        std::mem::swap(&mut prev, &mut curr);
        stats.rows_filled = stats.rows_filled.saturating_add(1);
        ctx.report_progress(k as f32 / max_k as f32);

        if !any_finite {
            break;
        }
    }

    #[cfg(feature = "rayon")]
    let thread_count = parallel.then(rayon::current_num_threads);
    #[cfg(not(feature = "rayon"))]
    let thread_count = None;

    Ok(DpSweep {
        n,
        cost_per_k,
        backpointers,
        thread_count,
    })
}

/// Walks backpointers from `(k, n)` down to row 0.
pub(crate) fn backtrack_change_points(
    sweep: &DpSweep,
    k: usize,
) -> Result<ChangePointSet, KtsError> {
    let n = sweep.n;
    let Some(table) = sweep.backpointers.as_ref() else {
        return Err(KtsError::invalid_input(
            "backtracking requires a sweep run with backtrack=true",
        ));
    };
    if k >= sweep.cost_per_k.len() {
        return Err(KtsError::invalid_input(format!(
            "cannot backtrack k={k}; sweep covers k <= {}",
            sweep.cost_per_k.len().saturating_sub(1)
        )));
    }

    let side = n + 1;
    let mut points = Vec::with_capacity(k);
    let mut end = n;
    for row in (1..=k).rev() {
        let split = table[row * side + end];
        if split == usize::MAX || split == 0 || split >= end {
            return Err(KtsError::resource_limit(format!(
                "internal backtrack failure at k={row}, end={end}"
            )));
        }
        points.push(split);
        end = split;
    }
    points.reverse();

    ChangePointSet::new(n, points)
}
