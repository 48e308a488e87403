//! Model client wrapper that attributes every call to the trajectory step
//! it ran under.

use async_trait::async_trait;
use cadence_core::error::ModelError;
use cadence_core::event::ModelPayload;
use cadence_core::{EventPayload, EventType, GenerateOptions, ModelClient, ModelKind};
use cadence_telemetry::{Span, SpanKind, TrajectoryRecorder, current_step};
use std::sync::Arc;
use std::time::Instant;

use crate::dispatcher::EventDispatcher;

/// Wraps a [`ModelClient`] for one turn: each call is recorded as a model
/// span in the turn's trace and announced with `MODEL_USED`, both tagged
/// with the ambient trajectory step.
pub struct TracedModel {
    inner: Arc<dyn ModelClient>,
    events: EventDispatcher,
    recorder: Arc<TrajectoryRecorder>,
    run_id: String,
}

impl TracedModel {
    pub fn new(
        inner: Arc<dyn ModelClient>,
        events: EventDispatcher,
        recorder: Arc<TrajectoryRecorder>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            events,
            recorder,
            run_id: run_id.into(),
        }
    }

    async fn observe<T>(&self, kind: ModelKind, started: Instant, outcome: &Result<T, ModelError>) {
        let step = current_step().map(String::from);
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut span = Span::new(SpanKind::ModelCall, self.inner.name())
            .with_step(step.clone())
            .with_metadata("kind", serde_json::Value::String(kind.to_string()));
        match outcome {
            Ok(_) => span.end(true),
            Err(e) => span.fail(e.to_string()),
        }
        self.recorder.record_span(&self.run_id, span);

        self.events
            .notify(
                EventType::ModelUsed,
                EventPayload::Model(ModelPayload {
                    model: self.inner.name().to_string(),
                    kind,
                    trajectory_step: step,
                    duration_ms,
                    success: outcome.is_ok(),
                }),
            )
            .await;
    }
}

#[async_trait]
impl ModelClient for TracedModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ModelError> {
        let started = Instant::now();
        let outcome = self.inner.generate(prompt, options).await;
        self.observe(options.kind, started, &outcome).await;
        outcome
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let started = Instant::now();
        let outcome = self.inner.embed(text).await;
        self.observe(ModelKind::Embedding, started, &outcome).await;
        outcome
    }
}
