//! Data model for turn traces and their spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A context provider invocation.
    Provider,
    /// One action plan step.
    ActionStep,
    /// One evaluator run.
    Evaluator,
    /// A model generation call.
    ModelCall,
    /// Top-level turn (message → responses).
    Turn,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider => write!(f, "provider"),
            Self::ActionStep => write!(f, "action_step"),
            Self::Evaluator => write!(f, "evaluator"),
            Self::ModelCall => write!(f, "model_call"),
            Self::Turn => write!(f, "turn"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier.
    pub id: String,
    /// Trajectory step this span belongs to (None outside any step).
    pub trajectory_step: Option<String>,
    /// What kind of work this represents.
    pub kind: SpanKind,
    /// Human-readable label (provider, action, or model name).
    pub label: String,
    /// When the span started.
    pub started_at: DateTime<Utc>,
    /// When the span ended (None if still running).
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds (computed on end).
    pub duration_ms: Option<u64>,
    /// Whether the operation succeeded.
    pub success: Option<bool>,
    /// Failure message, if any.
    pub error: Option<String>,
    /// Arbitrary metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    /// Create a new span with the given kind and label.
    pub fn new(kind: SpanKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trajectory_step: None,
            kind,
            label: label.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            success: None,
            error: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach the span to a trajectory step.
    pub fn with_step(mut self, step: Option<impl Into<String>>) -> Self {
        self.trajectory_step = step.map(Into::into);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mark the span as ended with the given success status.
    pub fn end(&mut self, success: bool) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some(
            now.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.success = Some(success);
    }

    /// Mark the span as failed with a message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.end(false);
        self.error = Some(error.into());
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All spans recorded for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Run id of the turn.
    pub id: String,
    /// Room the turn's message arrived in.
    pub room_id: String,
    pub spans: Vec<Span>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn new(run_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            id: run_id.into(),
            room_id: room_id.into(),
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Spans recorded under one trajectory step.
    pub fn spans_for_step<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a Span> + 'a {
        self.spans
            .iter()
            .filter(move |s| s.trajectory_step.as_deref() == Some(step))
    }

    pub fn count(&self, kind: SpanKind) -> usize {
        self.spans.iter().filter(|s| s.kind == kind).count()
    }

    pub fn failed_spans(&self) -> usize {
        self.spans.iter().filter(|s| s.success == Some(false)).count()
    }
}
