//! Thread-safe trajectory recorder: collects per-turn traces and their
//! spans so a step's nested work can be inspected after the fact.

use crate::model::{Span, SpanKind, Trace};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The trajectory recorder.
///
/// Thread-safe via `RwLock`; shared by every concurrent turn. Each turn
/// owns one `Trace` keyed by its run id.
pub struct TrajectoryRecorder {
    enabled: bool,
    /// Oldest completed traces are pruned beyond this many spans in total.
    max_spans: usize,
    /// All recorded traces (most recent last).
    traces: RwLock<Vec<Trace>>,
}

impl TrajectoryRecorder {
    pub fn new(max_spans: usize) -> Self {
        Self {
            enabled: true,
            max_spans,
            traces: RwLock::new(Vec::new()),
        }
    }

    /// A recorder that accepts calls and keeps nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // ── Trace management ──────────────────────────────────────────────

    /// Start the trace for a turn.
    pub fn start_trace(&self, run_id: &str, room_id: &str) {
        if !self.enabled {
            return;
        }
        let mut traces = self.write();
        self.prune(&mut traces);
        traces.push(Trace::new(run_id, room_id));
    }

    /// Start a trace that is closed as cancelled if the guard drops before
    /// [`end_trace`](Self::end_trace) is called for it.
    pub fn start_guarded(&self, run_id: &str, room_id: &str) -> TraceGuard<'_> {
        self.start_trace(run_id, room_id);
        TraceGuard {
            recorder: self,
            run_id: run_id.to_string(),
        }
    }

    pub fn end_trace(&self, run_id: &str) {
        if !self.enabled {
            return;
        }
        if let Some(trace) = self.write().iter_mut().find(|t| t.id == run_id) {
            trace.end();
        }
    }

    /// End a trace that is still open, adding a failed `Turn` span.
    /// Ended traces are left alone.
    pub fn abandon_trace(&self, run_id: &str) {
        if !self.enabled {
            return;
        }
        let mut traces = self.write();
        if let Some(trace) = traces
            .iter_mut()
            .rev()
            .find(|t| t.id == run_id && t.ended_at.is_none())
        {
            let mut span = Span::new(SpanKind::Turn, "cancelled");
            span.fail("turn cancelled before it finished");
            trace.add_span(span);
            trace.end();
            tracing::debug!(run_id, "Closed trace of a cancelled turn");
        }
    }

    /// Record a finished span in a turn's trace.
    pub fn record_span(&self, run_id: &str, span: Span) {
        if !self.enabled {
            return;
        }
        let mut traces = self.write();
        match traces.iter_mut().rev().find(|t| t.id == run_id) {
            Some(trace) => trace.add_span(span),
            None => tracing::debug!(run_id, span = %span.label, "Dropping span for unknown trace"),
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_trace(&self, run_id: &str) -> Option<Trace> {
        self.read().iter().find(|t| t.id == run_id).cloned()
    }

    /// Most recent first.
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        self.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn traces_for_room(&self, room_id: &str) -> Vec<Trace> {
        self.read()
            .iter()
            .filter(|t| t.room_id == room_id)
            .cloned()
            .collect()
    }

    /// Every span recorded under `step`, across all traces.
    pub fn spans_for_step(&self, step: &str) -> Vec<Span> {
        self.read()
            .iter()
            .flat_map(|t| t.spans_for_step(step).cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn trace_count(&self) -> usize {
        self.read().len()
    }

    pub fn span_count(&self, kind: SpanKind) -> usize {
        self.read().iter().map(|t| t.count(kind)).sum()
    }

    // Drop the oldest completed traces until the span total fits.
    fn prune(&self, traces: &mut Vec<Trace>) {
        let mut total: usize = traces.iter().map(|t| t.spans.len()).sum();
        if total < self.max_spans {
            return;
        }
        traces.retain(|t| {
            if total < self.max_spans || t.ended_at.is_none() {
                return true;
            }
            total -= t.spans.len();
            false
        });
    }

    // A panicking writer leaves the data intact; keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Trace>> {
        self.traces.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Trace>> {
        self.traces.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Closes its trace on drop; see [`TrajectoryRecorder::start_guarded`].
pub struct TraceGuard<'a> {
    recorder: &'a TrajectoryRecorder,
    run_id: String,
}

impl Drop for TraceGuard<'_> {
    fn drop(&mut self) {
        self.recorder.abandon_trace(&self.run_id);
    }
}

impl Default for TrajectoryRecorder {
    fn default() -> Self {
        Self::new(10_000)
    }
}
