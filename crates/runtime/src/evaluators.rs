//! Evaluator runner: post-hoc scoring once a turn's plan has closed.

use cadence_core::event::EvaluatorPayload;
use cadence_core::{Evaluator, EvaluatorContext, EvaluatorResult, EventPayload, EventType};
use cadence_telemetry::{Span, SpanKind, TrajectoryRecorder};
use futures::future::join_all;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::dispatcher::EventDispatcher;
use crate::isolate::{Isolated, isolate};
use crate::registry::EvaluatorRegistry;

pub struct EvaluatorRunner {
    evaluators: Arc<EvaluatorRegistry>,
    events: EventDispatcher,
    recorder: Arc<TrajectoryRecorder>,
    timeout: Duration,
}

impl EvaluatorRunner {
    pub fn new(
        evaluators: Arc<EvaluatorRegistry>,
        events: EventDispatcher,
        recorder: Arc<TrajectoryRecorder>,
        timeout: Duration,
    ) -> Self {
        Self {
            evaluators,
            events,
            recorder,
            timeout,
        }
    }

    /// Run every applicable evaluator concurrently.
    ///
    /// Results come back in registration order. Evaluators that decline
    /// through `validate` (and are not `always_run`) produce no result; a
    /// failing evaluator produces a failed result instead of an error.
    pub async fn run_evaluators(
        &self,
        run_id: &str,
        ctx: &EvaluatorContext<'_>,
    ) -> Vec<EvaluatorResult> {
        let runs = self
            .evaluators
            .iter()
            .map(|evaluator| self.run_one(run_id, evaluator.as_ref(), ctx));
        join_all(runs).await.into_iter().flatten().collect()
    }

    async fn run_one(
        &self,
        run_id: &str,
        evaluator: &dyn Evaluator,
        ctx: &EvaluatorContext<'_>,
    ) -> Option<EvaluatorResult> {
        let name = evaluator.name();
        if !evaluator.always_run() {
            let valid = isolate(self.timeout, async {
                Ok::<_, Infallible>(evaluator.validate(ctx).await)
            })
            .await
            .unwrap_or(false);
            if !valid {
                debug!(run_id, evaluator = name, "Evaluator skipped");
                return None;
            }
        }

        self.announce(EventType::EvaluatorStarted, run_id, name, None).await;
        let mut span = Span::new(SpanKind::Evaluator, name);

        let result = match isolate(self.timeout, evaluator.evaluate(ctx)).await {
            Ok(mut result) => {
                result.name = name.to_string();
                result.score = result.score.min(100);
                span.end(true);
                result
            }
            Err(e) => {
                let reason = match &e {
                    Isolated::TimedOut(limit) => cadence_core::error::EvaluatorError::Timeout {
                        evaluator: name.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    }
                    .to_string(),
                    other => other.to_string(),
                };
                warn!(run_id, evaluator = name, error = %reason, "Evaluator failed");
                span.fail(reason.clone());
                EvaluatorResult::failed(name, reason)
            }
        };

        self.recorder.record_span(run_id, span);
        self.announce(EventType::EvaluatorCompleted, run_id, name, Some(result.clone()))
            .await;
        Some(result)
    }

    async fn announce(
        &self,
        event_type: EventType,
        run_id: &str,
        evaluator: &str,
        result: Option<EvaluatorResult>,
    ) {
        self.events
            .notify(
                event_type,
                EventPayload::Evaluator(EvaluatorPayload {
                    run_id: run_id.to_string(),
                    evaluator: evaluator.to_string(),
                    result,
                }),
            )
            .await;
    }
}
