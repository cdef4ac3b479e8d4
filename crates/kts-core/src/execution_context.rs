// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::KtsError;
use crate::control::CancelToken;
use crate::observability::{ProgressSink, TelemetrySink};
use std::time::Instant;

/// Runtime controls passed through segmentation calls.
///
/// None of these affect the result of a successful run; they only decide
/// whether a run is allowed to finish.
#[derive(Clone, Copy, Default)]
pub struct ExecutionContext<'a> {
    pub cancel: Option<&'a CancelToken>,
    pub time_budget_ms: Option<u64>,
    pub memory_budget_bytes: Option<usize>,
    pub progress: Option<&'a dyn ProgressSink>,
    pub telemetry: Option<&'a dyn TelemetrySink>,
}

impl<'a> ExecutionContext<'a> {
    /// Creates a context with no limits and no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the optional cancellation token.
    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets a wall-clock budget measured from the start of each run.
    pub fn with_time_budget_ms(mut self, time_budget_ms: u64) -> Self {
        self.time_budget_ms = Some(time_budget_ms);
        self
    }

    /// Caps the estimated bytes of DP state a run may allocate.
    pub fn with_memory_budget_bytes(mut self, memory_budget_bytes: usize) -> Self {
        self.memory_budget_bytes = Some(memory_budget_bytes);
        self
    }

    /// Sets an optional progress sink.
    pub fn with_progress_sink(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Sets an optional telemetry sink.
    pub fn with_telemetry_sink(mut self, telemetry: &'a dyn TelemetrySink) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Returns true when cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    /// Returns a cancelled error when cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), KtsError> {
        if self.is_cancelled() {
            return Err(KtsError::cancelled());
        }
        Ok(())
    }

    /// Fails once the elapsed time since `started_at` exceeds the budget.
    pub fn check_time_budget(&self, started_at: Instant) -> Result<(), KtsError> {
        let Some(limit_ms) = self.time_budget_ms else {
            return Ok(());
        };

        let elapsed_ms = started_at.elapsed().as_millis();
        if elapsed_ms <= u128::from(limit_ms) {
            return Ok(());
        }
        Err(KtsError::resource_limit(format!(
            "time_budget_ms exceeded: elapsed_ms={elapsed_ms}, limit_ms={limit_ms}"
        )))
    }

    /// Fails when `required_bytes` exceeds the configured memory budget.
    pub fn check_memory_budget(&self, required_bytes: usize, what: &str) -> Result<(), KtsError> {
        if let Some(limit_bytes) = self.memory_budget_bytes
            && required_bytes > limit_bytes
        {
            return Err(KtsError::resource_limit(format!(
                "memory_budget_bytes exceeded for {what}: required_bytes={required_bytes}, limit_bytes={limit_bytes}"
            )));
        }
        Ok(())
    }

    /// True when the run may leave the polling loop (no cancel token, no time budget).
    pub fn is_unpolled(&self) -> bool {
        self.cancel.is_none() && self.time_budget_ms.is_none()
    }

    /// Emits clamped progress to the sink, if configured.
    pub fn report_progress(&self, fraction: f32) {
        if !fraction.is_finite() {
            return;
        }

        if let Some(sink) = self.progress {
            sink.on_progress(fraction.clamp(0.0, 1.0));
        }
    }

    /// Emits a scalar telemetry value to the sink, if configured.
    pub fn record_scalar(&self, key: &'static str, value: f64) {
        if let Some(sink) = self.telemetry {
            sink.record_scalar(key, value);
        }
    }
}
