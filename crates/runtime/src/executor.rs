//! Action executor: runs a plan's steps strictly in order.
//!
//! Per step: pending → validate → handler → completed | failed.
//!
//! - A step whose validation fails is marked `"validation failed"`.
//! - A handler error, timeout, panic or `success: false` result fails the
//!   step and execution moves on, unless the action is blocking: then every
//!   remaining pending step fails with `"upstream step failed"` without its
//!   handler being called.
//! - Failed steps are never retried.
//!
//! Each step runs under a fresh trajectory step id so nested model calls
//! are attributed to it.

use cadence_core::event::ActionPayload;
use cadence_core::{
    Action, ActionContext, ActionPlan, ActionResult, Content, EventPayload, EventType,
    MemoryStore, Message, ModelClient, ResponseSink, State, StepStatus,
};
use cadence_telemetry::{Span, SpanKind, TrajectoryRecorder, TrajectoryStepId, with_step};
use chrono::Utc;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dispatcher::EventDispatcher;
use crate::isolate::{Isolated, isolate};
use crate::registry::ActionRegistry;

pub const VALIDATION_FAILED: &str = "validation failed";
pub const UPSTREAM_FAILED: &str = "upstream step failed";
pub const ACTION_NOT_FOUND: &str = "action not found";
pub const REPORTED_FAILURE: &str = "action reported failure";

/// Everything a plan run needs from the surrounding turn.
pub struct ExecutionContext<'a> {
    pub run_id: &'a str,
    pub message: &'a Message,
    /// The decoded model response that produced the plan.
    pub response: &'a Content,
    pub sink: &'a ResponseSink,
    pub model: &'a dyn ModelClient,
    pub store: &'a dyn MemoryStore,
}

enum StepRun {
    Invalid,
    Handled(Result<Option<ActionResult>, Isolated<cadence_core::error::ActionError>>),
}

pub struct ActionExecutor {
    actions: Arc<ActionRegistry>,
    events: EventDispatcher,
    recorder: Arc<TrajectoryRecorder>,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(
        actions: Arc<ActionRegistry>,
        events: EventDispatcher,
        recorder: Arc<TrajectoryRecorder>,
        timeout: Duration,
    ) -> Self {
        Self {
            actions,
            events,
            recorder,
            timeout,
        }
    }

    /// Run every pending step of `plan`, then write the closed plan and the
    /// collected results into `state.data`.
    pub async fn execute_plan(
        &self,
        mut plan: ActionPlan,
        state: &mut State,
        cx: &ExecutionContext<'_>,
    ) -> ActionPlan {
        let total = plan.steps.len();
        // Results handed to later steps: completed steps only.
        let mut completed: Vec<ActionResult> = Vec::new();
        // Every result a handler produced, for `data.action_results`.
        let mut collected: Vec<ActionResult> = Vec::new();

        info!(
            run_id = cx.run_id,
            steps = total,
            plan = ?plan.action_names(),
            "Executing action plan"
        );

        for index in 0..total {
            if plan.steps[index].is_terminal() {
                continue;
            }
            plan.refresh_cursor();

            let name = plan.steps[index].action.clone();
            let step_id = TrajectoryStepId::new();
            {
                let step = &mut plan.steps[index];
                step.trajectory_step = Some(step_id.to_string());
                step.started_at = Some(Utc::now());
            }
            self.announce(EventType::ActionStarted, cx.run_id, &plan, index).await;

            let Some(action) = self.actions.get(&name).cloned() else {
                warn!(run_id = cx.run_id, action = %name, "Planned action is no longer registered");
                plan.steps[index].fail(ACTION_NOT_FOUND);
                self.finish_step(cx.run_id, &plan, index, &step_id).await;
                continue;
            };

            let run = {
                let ctx = ActionContext {
                    message: cx.message,
                    state: &*state,
                    response: cx.response,
                    previous_results: &completed,
                    step_index: index,
                    total_steps: total,
                    sink: cx.sink,
                    model: cx.model,
                    store: cx.store,
                };
                with_step(step_id.clone(), self.run_step(action.as_ref(), &ctx)).await
            };

            let failed = match run {
                StepRun::Invalid => {
                    debug!(run_id = cx.run_id, action = %name, "Action declined to run");
                    plan.steps[index].fail(VALIDATION_FAILED);
                    false
                }
                StepRun::Handled(Ok(Some(result))) if result.success => {
                    completed.push(result.clone());
                    collected.push(result.clone());
                    plan.steps[index].complete(Some(result));
                    false
                }
                StepRun::Handled(Ok(Some(result))) => {
                    let error = result
                        .error
                        .clone()
                        .unwrap_or_else(|| REPORTED_FAILURE.to_string());
                    collected.push(result.clone());
                    let step = &mut plan.steps[index];
                    step.fail(error);
                    step.result = Some(result);
                    true
                }
                StepRun::Handled(Ok(None)) => {
                    plan.steps[index].complete(None);
                    false
                }
                StepRun::Handled(Err(e)) => {
                    let error = match &e {
                        Isolated::Failed(err) => err.to_string(),
                        Isolated::TimedOut(limit) => cadence_core::error::ActionError::Timeout {
                            action: name.clone(),
                            timeout_ms: limit.as_millis() as u64,
                        }
                        .to_string(),
                        Isolated::Panicked(msg) => format!("action panicked: {msg}"),
                    };
                    collected.push(ActionResult::failure(error.clone()));
                    plan.steps[index].fail(error);
                    true
                }
            };

            if failed {
                warn!(
                    run_id = cx.run_id,
                    action = %name,
                    error = plan.steps[index].error.as_deref().unwrap_or_default(),
                    blocking = action.blocking(),
                    "Action step failed"
                );
            }
            self.finish_step(cx.run_id, &plan, index, &step_id).await;

            if failed && action.blocking() {
                self.short_circuit(cx.run_id, &mut plan, index).await;
            }
        }

        plan.refresh_cursor();
        info!(
            run_id = cx.run_id,
            completed = plan.completed_count(),
            failed = plan.failed_count(),
            "Action plan closed"
        );

        state.data.action_results = collected;
        state.data.action_plan = Some(plan.clone());
        plan
    }

    async fn run_step(&self, action: &dyn Action, ctx: &ActionContext<'_>) -> StepRun {
        let valid = isolate(self.timeout, async {
            Ok::<_, Infallible>(action.validate(ctx).await)
        })
        .await
        .unwrap_or(false);
        if !valid {
            return StepRun::Invalid;
        }
        StepRun::Handled(isolate(self.timeout, action.handle(ctx)).await)
    }

    /// Fail every pending step after `failed_at` without running it.
    async fn short_circuit(&self, run_id: &str, plan: &mut ActionPlan, failed_at: usize) {
        for index in failed_at + 1..plan.steps.len() {
            if plan.steps[index].is_terminal() {
                continue;
            }
            debug!(run_id, action = %plan.steps[index].action, "Skipping step after blocking failure");
            plan.steps[index].fail(UPSTREAM_FAILED);
            self.announce(EventType::ActionCompleted, run_id, plan, index).await;
        }
    }

    async fn finish_step(&self, run_id: &str, plan: &ActionPlan, index: usize, step_id: &TrajectoryStepId) {
        let step = &plan.steps[index];
        let mut span = Span::new(SpanKind::ActionStep, step.action.as_str())
            .with_step(Some(step_id.as_str()))
            .with_metadata("step_index", serde_json::Value::from(index));
        if let Some(started) = step.started_at {
            span.started_at = started;
        }
        match (&step.status, &step.error) {
            (StepStatus::Failed, Some(error)) => span.fail(error.clone()),
            (status, _) => span.end(*status == StepStatus::Completed),
        }
        self.recorder.record_span(run_id, span);
        self.announce(EventType::ActionCompleted, run_id, plan, index).await;
    }

    async fn announce(&self, event_type: EventType, run_id: &str, plan: &ActionPlan, index: usize) {
        let step = &plan.steps[index];
        self.events
            .notify(
                event_type,
                EventPayload::Action(ActionPayload {
                    run_id: run_id.to_string(),
                    action: step.action.clone(),
                    step_index: index,
                    status: step.status,
                    trajectory_step: step.trajectory_step.clone(),
                    error: step.error.clone(),
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Behavior, ScriptedModel, StubAction};
    use cadence_memory::InMemoryStore;

    struct Fixture {
        executor: ActionExecutor,
        recorder: Arc<TrajectoryRecorder>,
        events: EventDispatcher,
    }

    fn fixture(actions: Vec<Arc<dyn Action>>, timeout: Duration) -> Fixture {
        let mut reg = ActionRegistry::new();
        for a in actions {
            reg.register(a).unwrap();
        }
        let recorder = Arc::new(TrajectoryRecorder::default());
        recorder.start_trace("run-1", "room-1");
        let events = EventDispatcher::new(64, 64);
        Fixture {
            executor: ActionExecutor::new(Arc::new(reg), events.clone(), recorder.clone(), timeout),
            recorder,
            events,
        }
    }

    async fn run(fx: &Fixture, names: &[&str]) -> (ActionPlan, State, ResponseSink) {
        let message = Message::new("user-1", "room-1", "do things");
        let response = Content::text("");
        let sink = ResponseSink::new("room-1");
        let model = ScriptedModel::new(vec!["nested reply"]);
        let store = InMemoryStore::new();
        let cx = ExecutionContext {
            run_id: "run-1",
            message: &message,
            response: &response,
            sink: &sink,
            model: &model,
            store: &store,
        };
        let mut state = State::new();
        let plan = ActionPlan::new("t", names.iter().map(|n| n.to_string()));
        let plan = fx.executor.execute_plan(plan, &mut state, &cx).await;
        (plan, state, sink)
    }

    fn statuses(plan: &ActionPlan) -> Vec<StepStatus> {
        plan.steps.iter().map(|s| s.status).collect()
    }

    #[tokio::test]
    async fn middle_failure_is_isolated() {
        let third = Arc::new(StubAction::ok("C", "c"));
        let fx = fixture(
            vec![
                Arc::new(StubAction::ok("A", "a")),
                Arc::new(StubAction::failing("B", "boom")),
                third.clone(),
            ],
            Duration::from_secs(1),
        );
        let (plan, state, _) = run(&fx, &["A", "B", "C"]).await;

        assert_eq!(
            statuses(&plan),
            vec![StepStatus::Completed, StepStatus::Failed, StepStatus::Completed]
        );
        assert_eq!(plan.failed_count(), 1);
        assert_eq!(plan.steps[1].error.as_deref(), Some("boom"));
        assert_eq!(plan.current_step, plan.total_steps);
        assert_eq!(third.calls(), 1);
        assert_eq!(state.data.action_results.len(), 3);
        assert_eq!(state.data.action_plan.as_ref(), Some(&plan));
    }

    #[tokio::test]
    async fn blocking_failure_short_circuits() {
        let second = Arc::new(StubAction::ok("B", "b"));
        let third = Arc::new(StubAction::ok("C", "c"));
        let fx = fixture(
            vec![
                Arc::new(StubAction::failing("A", "denied").blocking()),
                second.clone(),
                third.clone(),
            ],
            Duration::from_secs(1),
        );
        let (plan, _, _) = run(&fx, &["A", "B", "C"]).await;

        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Failed));
        assert_eq!(plan.steps[0].error.as_deref(), Some("denied"));
        assert_eq!(plan.steps[1].error.as_deref(), Some(UPSTREAM_FAILED));
        assert_eq!(plan.steps[2].error.as_deref(), Some(UPSTREAM_FAILED));
        assert_eq!(second.calls(), 0);
        assert_eq!(third.calls(), 0);
        assert!(plan.is_closed());
    }

    #[tokio::test]
    async fn reported_failure_counts_as_failure_and_blocks() {
        let after = Arc::new(StubAction::ok("B", "b"));
        let fx = fixture(
            vec![
                Arc::new(StubAction::new("A", Behavior::Report("card declined".into())).blocking()),
                after.clone(),
            ],
            Duration::from_secs(1),
        );
        let (plan, _, _) = run(&fx, &["A", "B"]).await;
        assert_eq!(plan.steps[0].error.as_deref(), Some("card declined"));
        assert!(plan.steps[0].result.is_some());
        assert_eq!(plan.steps[1].error.as_deref(), Some(UPSTREAM_FAILED));
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn validation_failure_skips_handler_and_does_not_block() {
        let gated = Arc::new(StubAction::ok("A", "a").invalid().blocking());
        let fx = fixture(
            vec![gated.clone(), Arc::new(StubAction::ok("B", "b"))],
            Duration::from_secs(1),
        );
        let (plan, _, _) = run(&fx, &["A", "B"]).await;
        assert_eq!(plan.steps[0].error.as_deref(), Some(VALIDATION_FAILED));
        assert_eq!(plan.steps[1].status, StepStatus::Completed);
        assert_eq!(gated.calls(), 0);
    }

    #[tokio::test]
    async fn missing_action_fails_its_step() {
        let fx = fixture(vec![Arc::new(StubAction::ok("A", "a"))], Duration::from_secs(1));
        let (plan, _, _) = run(&fx, &["GONE", "A"]).await;
        assert_eq!(plan.steps[0].error.as_deref(), Some(ACTION_NOT_FOUND));
        assert_eq!(plan.steps[1].status, StepStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_and_panics_are_handler_failures() {
        let fx = fixture(
            vec![
                Arc::new(StubAction::new("SLOW", Behavior::Hang)),
                Arc::new(StubAction::new("BUGGY", Behavior::Panic)),
                Arc::new(StubAction::new("QUIET", Behavior::Silent)),
            ],
            Duration::from_millis(200),
        );
        let (plan, _, _) = run(&fx, &["SLOW", "BUGGY", "QUIET"]).await;
        assert!(plan.steps[0].error.as_deref().unwrap().contains("timed out after 200ms"));
        assert_eq!(plan.steps[1].error.as_deref(), Some("action panicked: action bug"));
        assert_eq!(plan.steps[2].status, StepStatus::Completed);
        assert!(plan.steps[2].result.is_none());
    }

    #[tokio::test]
    async fn later_steps_see_completed_results() {
        let last = Arc::new(StubAction::ok("C", "c"));
        let fx = fixture(
            vec![
                Arc::new(StubAction::ok("A", "a")),
                Arc::new(StubAction::failing("B", "x")),
                last.clone(),
            ],
            Duration::from_secs(1),
        );
        run(&fx, &["A", "B", "C"]).await;
        assert_eq!(last.previous_seen(), vec![1]);
    }

    #[tokio::test]
    async fn each_step_gets_its_own_trajectory_step() {
        let a = Arc::new(StubAction::new("A", Behavior::AskModel));
        let b = Arc::new(StubAction::ok("B", "b"));
        let fx = fixture(vec![a.clone(), b.clone()], Duration::from_secs(1));
        let (plan, _, _) = run(&fx, &["A", "B"]).await;

        let step_a = plan.steps[0].trajectory_step.clone().unwrap();
        let step_b = plan.steps[1].trajectory_step.clone().unwrap();
        assert_ne!(step_a, step_b);
        assert_eq!(a.steps_seen()[0].as_ref().map(|s| s.to_string()), Some(step_a.clone()));
        assert_eq!(b.steps_seen()[0].as_ref().map(|s| s.to_string()), Some(step_b));
        assert_eq!(
            fx.recorder.spans_for_step(&step_a).len(),
            1,
            "one action span for step A"
        );
        assert_eq!(plan.steps[0].result.as_ref().unwrap().text.as_deref(), Some("nested reply"));
    }

    #[tokio::test]
    async fn step_events_are_emitted_in_order() {
        let fx = fixture(
            vec![Arc::new(StubAction::ok("A", "a")), Arc::new(StubAction::failing("B", "x"))],
            Duration::from_secs(1),
        );
        let mut tap = fx.events.tap();
        run(&fx, &["A", "B"]).await;

        let mut seen = Vec::new();
        while let Ok(event) = tap.try_recv() {
            if let EventPayload::Action(p) = event.payload {
                seen.push((event.event_type, p.action, p.status));
            }
        }
        assert_eq!(
            seen,
            vec![
                (EventType::ActionStarted, "A".to_string(), StepStatus::Pending),
                (EventType::ActionCompleted, "A".to_string(), StepStatus::Completed),
                (EventType::ActionStarted, "B".to_string(), StepStatus::Pending),
                (EventType::ActionCompleted, "B".to_string(), StepStatus::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn replies_reach_the_sink() {
        let fx = fixture(
            vec![Arc::new(StubAction::replying("REPLY", "hello there"))],
            Duration::from_secs(1),
        );
        let (_, _, sink) = run(&fx, &["REPLY"]).await;
        assert_eq!(sink.responses()[0].text, "hello there");
    }
}
