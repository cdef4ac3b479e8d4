// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::fixed::{
    DEFAULT_CANCEL_CHECK_EVERY, LengthBounds, backtrack_change_points, run_sweep,
    validate_length_bounds,
};
use crate::scatter::ScatterTable;
use kts_core::{ChangePointSet, Diagnostics, ExecutionContext, KtsError, SweepStats};
use std::borrow::Cow;
use std::time::Instant;
use tracing::debug;

const DEFAULT_MAX_CHANGE_POINTS: usize = 16;
const DEFAULT_PENALTY_WEIGHT: f64 = 1.0;

/// Configuration for [`AutoSegmenter`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct AutoConfig {
    /// Largest change-point count searched; clamped to `n - 1`.
    pub max_change_points: usize,
    /// Trade-off between fit and number of change points. Must be `>= 0`.
    pub penalty_weight: f64,
    pub min_segment_len: usize,
    pub max_segment_len: Option<usize>,
    /// Frames per descriptor. The penalty is evaluated on the original
    /// sequence length `n * desc_rate`.
    pub desc_rate: usize,
    pub cancel_check_every: usize,
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self {
            max_change_points: DEFAULT_MAX_CHANGE_POINTS,
            penalty_weight: DEFAULT_PENALTY_WEIGHT,
            min_segment_len: 1,
            max_segment_len: None,
            desc_rate: 1,
            cancel_check_every: DEFAULT_CANCEL_CHECK_EVERY,
        }
    }
}

impl AutoConfig {
    fn validate(&self) -> Result<(), KtsError> {
        if !self.penalty_weight.is_finite() || self.penalty_weight < 0.0 {
            return Err(KtsError::invalid_input(format!(
                "penalty_weight must be finite and >= 0; got {}",
                self.penalty_weight
            )));
        }
        if self.desc_rate == 0 {
            return Err(KtsError::invalid_input("desc_rate must be >= 1; got 0"));
        }
        validate_length_bounds(self.min_segment_len, self.max_segment_len)
    }

    fn normalized_cancel_check_every(&self) -> usize {
        self.cancel_check_every.max(1)
    }
}

/// Result of automatic change-point count selection.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct AutoSegmentation {
    pub n: usize,
    /// Selected count `m*`.
    pub change_count: usize,
    pub change_points: ChangePointSet,
    /// Total scatter of the selected partition.
    pub objective: f64,
    /// Minimum total scatter for each searched count; infinite when infeasible.
    pub cost_per_k: Vec<f64>,
    pub penalties: Vec<f64>,
    /// `cost_per_k[m] / n + penalties[m]`; infinite when infeasible.
    pub scores: Vec<f64>,
    pub diagnostics: Diagnostics,
}

/// Complexity penalty `(w * m / (2N)) * (ln(N / m) + 1)`, zero for `m = 0`.
///
/// `total_len` is the length `N` of the original sequence.
pub fn complexity_penalty(change_count: usize, total_len: usize, penalty_weight: f64) -> f64 {
    if change_count == 0 {
        return 0.0;
    }
    let m = change_count as f64;
    let total = total_len as f64;
    (penalty_weight * m / (2.0 * total)) * ((total / m).ln() + 1.0)
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Selection {
    change_count: usize,
    score: f64,
}

/// Smallest-score feasible count; exact ties go to the smaller count.
fn select_change_count(scores: &[f64]) -> Option<Selection> {
    let mut best: Option<Selection> = None;
    for (change_count, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        if best.is_none_or(|current| score < current.score) {
            best = Some(Selection {
                change_count,
                score,
            });
        }
    }
    best
}

/// Model-selection segmenter: picks the change-point count minimizing
/// `cost / n + penalty`.
#[derive(Debug)]
pub struct AutoSegmenter {
    config: AutoConfig,
}

impl AutoSegmenter {
    pub fn new(config: AutoConfig) -> Result<Self, KtsError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AutoConfig {
        &self.config
    }

    pub fn segment(
        &self,
        scatter: &ScatterTable,
        ctx: &ExecutionContext<'_>,
    ) -> Result<AutoSegmentation, KtsError> {
        self.config.validate()?;

        let n = scatter.n();
        let mut warnings = vec![];
        let (bounds, clamp_warning) =
            LengthBounds::resolve(n, self.config.min_segment_len, self.config.max_segment_len)?;
        warnings.extend(clamp_warning);

        let max_k = self.config.max_change_points.min(n - 1);
        if max_k < self.config.max_change_points {
            warnings.push(format!(
                "max_change_points={} exceeds n-1={}; clamped",
                self.config.max_change_points,
                n - 1
            ));
        }
        let total_len = n.checked_mul(self.config.desc_rate).ok_or_else(|| {
            KtsError::resource_limit(format!(
                "n * desc_rate overflow: n={n}, desc_rate={}",
                self.config.desc_rate
            ))
        })?;

        let started_at = Instant::now();
        let cancel_check_every = self.config.normalized_cancel_check_every();
        let mut stats = SweepStats::default();

        let search = run_sweep(
            scatter,
            max_k,
            bounds,
            false,
            cancel_check_every,
            ctx,
            started_at,
            &mut stats,
        )?;

        let penalties: Vec<f64> = (0..=max_k)
            .map(|m| complexity_penalty(m, total_len, self.config.penalty_weight))
            .collect();
        let mut scores = Vec::with_capacity(max_k + 1);
        for (m, (&cost, &penalty)) in search.cost_per_k.iter().zip(penalties.iter()).enumerate() {
            if !cost.is_finite() {
                scores.push(f64::INFINITY);
                continue;
            }
            let score = cost / n as f64 + penalty;
            if !score.is_finite() {
                return Err(KtsError::numerical_issue(format!(
                    "non-finite score for m={m}: cost={cost}, penalty={penalty}"
                )));
            }
            scores.push(score);
        }

        let feasible = scores.iter().filter(|score| score.is_finite()).count();
        let Some(selection) = select_change_count(&scores) else {
            return Err(KtsError::no_feasible_segmentation(format!(
                "no change-point count in 0..={max_k} is feasible for n={n}, min_segment_len={}, max_segment_len={}",
                bounds.min_len, bounds.max_len
            )));
        };
        let selected = selection.change_count;

        let final_sweep = run_sweep(
            scatter,
            selected,
            bounds,
            true,
            cancel_check_every,
            ctx,
            started_at,
            &mut stats,
        )?;
        let objective = final_sweep.cost_per_k[selected];
        let change_points = backtrack_change_points(&final_sweep, selected)?;

        let runtime_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        ctx.record_scalar("offline.kts.rows_filled", stats.rows_filled as f64);
        ctx.record_scalar(
            "offline.kts.transitions_considered",
            stats.transitions_considered as f64,
        );
        ctx.record_scalar("offline.kts.selected_change_count", selected as f64);
        ctx.record_scalar("offline.kts.runtime_ms", runtime_ms as f64);
        ctx.report_progress(1.0);

        debug!(
            n,
            max_k,
            feasible,
            selected,
            score = selection.score,
            penalty_weight = self.config.penalty_weight,
            "automatic segmentation done"
        );

        let notes = vec![
            format!(
                "penalty_weight={}, desc_rate={}",
                self.config.penalty_weight, self.config.desc_rate
            ),
            format!(
                "min_segment_len={}, max_segment_len={}",
                bounds.min_len, bounds.max_len
            ),
            format!("searched_change_counts=0..={max_k}, feasible={feasible}"),
            format!(
                "selected_change_count={selected}, selected_score={}, objective={objective}",
                selection.score
            ),
        ];

        let diagnostics = Diagnostics {
            n,
            runtime_ms: Some(runtime_ms),
            notes,
            warnings,
            algorithm: Cow::Borrowed("kts_auto"),
            thread_count: search.thread_count,
            sweep_stats: Some(stats),
            #[cfg(feature = "serde")]
            params_json: serde_json::to_value(&self.config).ok(),
            ..Diagnostics::default()
        };

        Ok(AutoSegmentation {
            n,
            change_count: selected,
            change_points,
            objective,
            cost_per_k: search.cost_per_k,
            penalties,
            scores,
            diagnostics,
        })
    }
}

/// Selects the number of change points in `0..=max_change_points` and
/// returns its optimal partition.
///
/// Fails with [`KtsError::NoFeasibleSegmentation`] when no count in the
/// range satisfies the length bounds.
pub fn segment_auto(
    scatter: &ScatterTable,
    max_change_points: usize,
    penalty_weight: f64,
    min_segment_len: usize,
    max_segment_len: Option<usize>,
) -> Result<AutoSegmentation, KtsError> {
    let segmenter = AutoSegmenter::new(AutoConfig {
        max_change_points,
        penalty_weight,
        min_segment_len,
        max_segment_len,
        ..AutoConfig::default()
    })?;
    segmenter.segment(scatter, &ExecutionContext::new())
}
