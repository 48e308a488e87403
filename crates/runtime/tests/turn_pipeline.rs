//! End-to-end tests for the Cadence turn pipeline.
//!
//! These drive `AgentRuntime::handle_message` with scripted models and
//! plugins and check what a turn leaves behind: responses, the closed
//! plan, evaluator results, events, and recorded spans.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_config::EngineConfig;
use cadence_core::error::{ActionError, DeliveryError, EvaluatorError, ModelError, StoreError};
use cadence_core::{
    Action, ActionContext, ActionResult, Content, ContextProvider, EmbeddingEntry, Entity,
    Evaluator, EvaluatorContext, EvaluatorResult, EventType, GenerateOptions, MemoryStore, Message,
    ModelClient, OutboundSink, ProviderContext, ProviderResult, ResponseSink, Room, StepStatus,
    TurnOutcome, TurnRecord, Value, World,
};
use cadence_memory::InMemoryStore;
use cadence_runtime::{AgentRuntime, EventHandler, ProviderCache, ProviderFilter, handler_fn};
use cadence_telemetry::SpanKind;

// ── Mock Model ───────────────────────────────────────────────────────────

/// Answers the turn prompt with `plan_reply` and anything else (prompts
/// sent from inside actions) with `"ack: <prompt>"`.
struct PlanModel {
    plan_reply: Result<String, ModelError>,
    prompts: Mutex<Vec<String>>,
}

impl PlanModel {
    fn replying(reply: &str) -> Self {
        Self {
            plan_reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(reason: &str) -> Self {
        Self {
            plan_reply: Err(ModelError::RequestFailed(reason.to_string())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for PlanModel {
    fn name(&self) -> &str {
        "plan-model"
    }

    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with("lookup:") {
            return Ok(format!("ack: {prompt}"));
        }
        self.plan_reply.clone()
    }
}

// ── Mock Actions ─────────────────────────────────────────────────────────

enum Step {
    Succeed(&'static str),
    Fail(&'static str),
    AskModel,
}

struct ScriptedAction {
    name: &'static str,
    step: Step,
    blocking: bool,
    calls: Mutex<usize>,
    previous_seen: Mutex<Vec<usize>>,
}

impl ScriptedAction {
    fn new(name: &'static str, step: Step) -> Self {
        Self {
            name,
            step,
            blocking: false,
            calls: Mutex::new(0),
            previous_seen: Mutex::new(Vec::new()),
        }
    }

    fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Action for ScriptedAction {
    fn name(&self) -> &str {
        self.name
    }

    fn blocking(&self) -> bool {
        self.blocking
    }

    async fn handle(&self, ctx: &ActionContext<'_>) -> Result<Option<ActionResult>, ActionError> {
        *self.calls.lock().unwrap() += 1;
        self.previous_seen.lock().unwrap().push(ctx.previous_results.len());
        match &self.step {
            Step::Succeed(text) => Ok(Some(ActionResult::ok(*text))),
            Step::Fail(reason) => Err(ActionError::Failed(reason.to_string())),
            Step::AskModel => {
                let prompt = format!("lookup: {} step {}", ctx.message.text(), ctx.step_index);
                let answer = ctx
                    .model
                    .generate(&prompt, &GenerateOptions::small())
                    .await
                    .map_err(|e| ActionError::Failed(e.to_string()))?;
                Ok(Some(ActionResult::ok(answer)))
            }
        }
    }
}

/// Panics when handled.
struct ExplodingAction;

#[async_trait]
impl Action for ExplodingAction {
    fn name(&self) -> &str {
        "EXPLODE"
    }

    async fn handle(&self, _ctx: &ActionContext<'_>) -> Result<Option<ActionResult>, ActionError> {
        panic!("fuse lit");
    }
}

// ── Mock Providers ───────────────────────────────────────────────────────

struct CountingProvider {
    name: &'static str,
    position: i32,
    dynamic: bool,
    calls: Mutex<usize>,
}

impl CountingProvider {
    fn new(name: &'static str, position: i32) -> Self {
        Self {
            name,
            position,
            dynamic: false,
            calls: Mutex::new(0),
        }
    }

    fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ContextProvider for CountingProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn position(&self) -> i32 {
        self.position
    }

    fn dynamic(&self) -> bool {
        self.dynamic
    }

    async fn get(
        &self,
        _ctx: &ProviderContext<'_>,
    ) -> Result<ProviderResult, cadence_core::error::ProviderError> {
        *self.calls.lock().unwrap() += 1;
        Ok(ProviderResult::text(format!("[{}]", self.name)).with_value(self.name, self.position as i64))
    }
}

// ── Mock Evaluator ───────────────────────────────────────────────────────

/// Scores the share of completed steps.
struct CompletionEvaluator {
    calls: Mutex<usize>,
}

impl CompletionEvaluator {
    fn new() -> Self {
        Self {
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Evaluator for CompletionEvaluator {
    fn name(&self) -> &str {
        "COMPLETION"
    }

    fn always_run(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &EvaluatorContext<'_>) -> Result<EvaluatorResult, EvaluatorError> {
        *self.calls.lock().unwrap() += 1;
        let total = ctx.plan.total_steps.max(1);
        let score = (ctx.plan.completed_count() * 100 / total) as u32;
        Ok(EvaluatorResult::new(
            "COMPLETION",
            score,
            score == 100,
            format!("{}/{} steps completed", ctx.plan.completed_count(), ctx.plan.total_steps),
        ))
    }
}

// ── Mock Store and Channel ───────────────────────────────────────────────

/// An in-memory store whose message writes report the backend as down.
struct UnreachableStore {
    inner: InMemoryStore,
}

#[async_trait]
impl MemoryStore for UnreachableStore {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn save_message(&self, _message: &Message) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection pool exhausted".into()))
    }

    async fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.inner.recent_messages(room_id, limit).await
    }

    async fn save_turn(&self, record: &TurnRecord) -> Result<(), StoreError> {
        self.inner.save_turn(record).await
    }

    async fn turns_for_room(&self, room_id: &str) -> Result<Vec<TurnRecord>, StoreError> {
        self.inner.turns_for_room(room_id).await
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, StoreError> {
        self.inner.get_entity(id).await
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<(), StoreError> {
        self.inner.upsert_entity(entity).await
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        self.inner.get_room(id).await
    }

    async fn upsert_room(&self, room: Room) -> Result<(), StoreError> {
        self.inner.upsert_room(room).await
    }

    async fn get_world(&self, id: &str) -> Result<Option<World>, StoreError> {
        self.inner.get_world(id).await
    }

    async fn upsert_world(&self, world: World) -> Result<(), StoreError> {
        self.inner.upsert_world(world).await
    }

    async fn get_cache(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get_cache(key).await
    }

    async fn set_cache(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.inner.set_cache(key, value).await
    }

    async fn save_embedding(&self, entry: EmbeddingEntry) -> Result<String, StoreError> {
        self.inner.save_embedding(entry).await
    }

    async fn search_similar(
        &self,
        vector: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<EmbeddingEntry>, StoreError> {
        self.inner.search_similar(vector, limit, min_score).await
    }
}

#[derive(Default)]
struct RecordingChannel {
    delivered: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl OutboundSink for RecordingChannel {
    async fn deliver(&self, room_id: &str, content: &Content) -> Result<(), DeliveryError> {
        self.delivered
            .lock()
            .unwrap()
            .push((room_id.to_string(), content.text.clone()));
        Ok(())
    }
}

fn event_log() -> (Arc<Mutex<Vec<EventType>>>, Arc<dyn EventHandler>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let handler = handler_fn(move |event| {
        let sink = sink.clone();
        let event_type = event.event_type;
        async move {
            sink.lock().unwrap().push(event_type);
            Ok::<(), cadence_core::error::EventError>(())
        }
    });
    (log, handler)
}

const CANCEL_REPLY: &str = "<response>\
<thought>Look the order up, cancel it, tell the customer.</thought>\
<actions>LOOKUP_ORDER, CANCEL_ORDER, NOTIFY_CUSTOMER</actions>\
<text>Cancelling order 42.</text>\
</response>";

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_cancel_order_blocking_failure_short_circuits() {
    let lookup = Arc::new(ScriptedAction::new("LOOKUP_ORDER", Step::Succeed("order 42: shipped")));
    let cancel = Arc::new(
        ScriptedAction::new("CANCEL_ORDER", Step::Fail("order already shipped")).blocking(),
    );
    let notify = Arc::new(ScriptedAction::new("NOTIFY_CUSTOMER", Step::Succeed("sent")));
    let evaluator = Arc::new(CompletionEvaluator::new());

    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(Arc::new(PlanModel::replying(CANCEL_REPLY)))
        .action(lookup.clone())
        .action(cancel.clone())
        .action(notify.clone())
        .evaluator(evaluator.clone())
        .build()
        .unwrap();

    let message = Message::new("customer-7", "support-room", "cancel order 42");
    let sink = ResponseSink::new("support-room");
    let result = runtime.handle_message(&message, &sink).await;

    let plan = &result.plan;
    assert_eq!(plan.action_names(), vec!["LOOKUP_ORDER", "CANCEL_ORDER", "NOTIFY_CUSTOMER"]);
    assert_eq!(plan.thought, "Look the order up, cancel it, tell the customer.");
    assert_eq!(plan.steps[0].status, StepStatus::Completed);
    assert_eq!(plan.steps[1].status, StepStatus::Failed);
    assert_eq!(plan.steps[1].error.as_deref(), Some("order already shipped"));
    assert_eq!(plan.steps[2].status, StepStatus::Failed);
    assert_eq!(plan.steps[2].error.as_deref(), Some("upstream step failed"));
    assert!(plan.is_closed());
    assert_eq!(plan.current_step, plan.total_steps);

    assert_eq!(notify.calls(), 0);
    assert_eq!(cancel.previous_seen.lock().unwrap().as_slice(), &[1]);

    assert_eq!(evaluator.calls(), 1);
    assert_eq!(result.evaluations.len(), 1);
    assert_eq!(result.evaluations[0].score, 33);
    assert_eq!(result.outcome, TurnOutcome::Partial);

    // Nothing replied, so the customer hears what did complete and what did not.
    assert_eq!(result.responses.len(), 1);
    let text = result.text();
    assert!(text.starts_with("order 42: shipped"), "{text}");
    assert!(text.contains("CANCEL_ORDER (order already shipped)"), "{text}");
    assert!(text.contains("NOTIFY_CUSTOMER (upstream step failed)"), "{text}");

    let results = &result.state.data.action_results;
    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert_eq!(results[1].error.as_deref(), Some("order already shipped"));
}

#[tokio::test]
async fn e2e_failures_stay_inside_their_step() {
    let reply = "<actions>LOOKUP_ORDER,EXPLODE,MISSING_ACTION,REPLY</actions><text>Done.</text>";
    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(Arc::new(PlanModel::replying(reply)))
        .action(Arc::new(ScriptedAction::new("LOOKUP_ORDER", Step::Fail("db timeout"))))
        .action(Arc::new(ExplodingAction))
        .build()
        .unwrap();

    let result = runtime
        .process(&Message::new("u", "room", "status?"))
        .await;

    // Unknown names are dropped from the plan.
    assert_eq!(result.plan.action_names(), vec!["LOOKUP_ORDER", "EXPLODE", "REPLY"]);
    let statuses: Vec<_> = result.plan.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Failed, StepStatus::Failed, StepStatus::Completed]
    );
    assert!(
        result.plan.steps[1]
            .error
            .as_deref()
            .unwrap()
            .contains("fuse lit")
    );
    assert_eq!(result.text(), "Done.");
    assert_eq!(result.outcome, TurnOutcome::Partial);
}

#[tokio::test]
async fn e2e_similes_resolve_to_registered_actions() {
    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(Arc::new(PlanModel::replying(
            "<actions>respond</actions><text>Sure thing.</text>",
        )))
        .build()
        .unwrap();

    let result = runtime.process(&Message::new("u", "room", "hi")).await;
    assert_eq!(result.plan.action_names(), vec!["REPLY"]);
    assert_eq!(result.text(), "Sure thing.");
    assert_eq!(result.outcome, TurnOutcome::Complete);
}

#[tokio::test]
async fn e2e_unreachable_store_aborts_with_fallback() {
    let model = Arc::new(PlanModel::replying(CANCEL_REPLY));
    let evaluator = Arc::new(CompletionEvaluator::new());
    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(model.clone())
        .store(Arc::new(UnreachableStore {
            inner: InMemoryStore::new(),
        }))
        .evaluator(evaluator.clone())
        .build()
        .unwrap();
    let (log, handler) = event_log();
    runtime.subscribe(EventType::RunEnded, handler);

    let result = runtime.process(&Message::new("u", "room", "hello")).await;

    assert_eq!(result.outcome, TurnOutcome::Failed);
    assert!(result.error.as_deref().unwrap().contains("connection pool exhausted"));
    assert_eq!(result.text(), runtime.config().fallback_response);
    assert_eq!(model.calls(), 0);
    assert_eq!(evaluator.calls(), 0);

    runtime.events().flush().await.unwrap();
    assert_eq!(log.lock().unwrap().as_slice(), &[EventType::RunEnded]);
}

#[tokio::test]
async fn e2e_model_failure_sends_fallback_and_still_evaluates() {
    let evaluator = Arc::new(CompletionEvaluator::new());
    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(Arc::new(PlanModel::failing("upstream 503")))
        .evaluator(evaluator.clone())
        .build()
        .unwrap();

    let result = runtime.process(&Message::new("u", "room", "hello")).await;

    assert_eq!(result.text(), runtime.config().fallback_response);
    assert!(result.plan.steps.is_empty());
    assert_eq!(result.state.data.action_plan.as_ref().map(|p| p.total_steps), Some(0));
    assert_eq!(evaluator.calls(), 1);
    assert_eq!(result.outcome, TurnOutcome::Failed);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn e2e_events_follow_the_turn() {
    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(Arc::new(PlanModel::replying("<text>Hello!</text>")))
        .evaluator(Arc::new(CompletionEvaluator::new()))
        .build()
        .unwrap();
    let (log, handler) = event_log();
    for event_type in [
        EventType::MessageReceived,
        EventType::RunStarted,
        EventType::ModelUsed,
        EventType::ActionStarted,
        EventType::ActionCompleted,
        EventType::EvaluatorStarted,
        EventType::EvaluatorCompleted,
        EventType::MessageSent,
        EventType::RunEnded,
    ] {
        runtime.subscribe(event_type, handler.clone());
    }

    runtime.process(&Message::new("u", "room", "hi")).await;
    runtime.events().flush().await.unwrap();

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[
            EventType::MessageReceived,
            EventType::RunStarted,
            EventType::ModelUsed,
            EventType::ActionStarted,
            EventType::ActionCompleted,
            EventType::EvaluatorStarted,
            EventType::EvaluatorCompleted,
            EventType::MessageSent,
            EventType::RunEnded,
        ]
    );
}

#[tokio::test]
async fn e2e_hung_observer_never_stalls_turns() {
    let mut config = EngineConfig::default();
    config.events.queue_capacity = 4;
    config.timeouts.event_handler_ms = 50;
    let runtime = AgentRuntime::builder(config)
        .model(Arc::new(PlanModel::replying("<text>Still here.</text>")))
        .build()
        .unwrap();
    runtime.subscribe(
        EventType::MessageReceived,
        handler_fn(|_| async {
            std::future::pending::<()>().await;
            Ok::<(), cadence_core::error::EventError>(())
        }),
    );

    for i in 0..5 {
        let message = Message::new("u", "room", format!("message {i}"));
        let result = tokio::time::timeout(Duration::from_secs(2), runtime.process(&message))
            .await
            .expect("turn stalled behind a hung event handler");
        assert_eq!(result.text(), "Still here.");
    }

    tokio::time::timeout(Duration::from_secs(5), runtime.stop())
        .await
        .expect("stop stalled behind a hung event handler");
}

#[tokio::test]
async fn e2e_process_delivers_to_the_channel() {
    let channel = Arc::new(RecordingChannel::default());
    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(Arc::new(PlanModel::replying("<text>On its way.</text>")))
        .outbound(channel.clone())
        .build()
        .unwrap();

    runtime.process(&Message::new("u", "room-9", "where is it?")).await;

    assert_eq!(
        channel.delivered.lock().unwrap().as_slice(),
        &[("room-9".to_string(), "On its way.".to_string())]
    );
}

#[tokio::test]
async fn e2e_history_reaches_the_next_prompt() {
    let model = Arc::new(PlanModel::replying("<text>ok</text>"));
    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(model.clone())
        .build()
        .unwrap();

    runtime.process(&Message::new("alice", "room", "first question")).await;
    runtime.process(&Message::new("alice", "room", "second question")).await;

    let prompts = model.prompts.lock().unwrap();
    assert!(!prompts[0].contains("# Conversation so far"));
    assert!(prompts[1].contains("# Conversation so far\nalice: first question"));
    assert!(prompts[1].contains("# Latest message\nalice: second question"));
}

#[tokio::test]
async fn e2e_providers_compose_in_position_order_and_cache_per_turn() {
    let late = Arc::new(CountingProvider::new("LATE", 50));
    let early = Arc::new(CountingProvider::new("EARLY", -5));
    let tied_first = Arc::new(CountingProvider::new("TIED_A", 20));
    let tied_second = Arc::new(CountingProvider::new("TIED_B", 20));
    let clock = Arc::new(CountingProvider::new("CLOCK", 30).dynamic());

    let runtime = AgentRuntime::builder(EngineConfig::default())
        .model(Arc::new(PlanModel::replying("<text>ok</text>")))
        .provider(late.clone())
        .provider(early.clone())
        .provider(tied_first.clone())
        .provider(tied_second.clone())
        .provider(clock.clone())
        .without_builtins()
        .build()
        .unwrap();

    let message = Message::new("u", "room", "hi");
    let mut cache = ProviderCache::for_run("run-x");
    let state = runtime
        .compose_state(&message, &ProviderFilter::All, &mut cache)
        .await;
    assert_eq!(state.text, "[EARLY]\n\n[TIED_A]\n\n[TIED_B]\n\n[CLOCK]\n\n[LATE]");
    assert_eq!(state.value("EARLY"), Some(&Value::Int(-5)));

    // Same turn: static providers come from the cache, dynamic ones rerun.
    let narrowed = runtime
        .compose_state(&message, &ProviderFilter::only(["LATE", "CLOCK"]), &mut cache)
        .await;
    assert_eq!(narrowed.text, "[CLOCK]\n\n[LATE]");
    assert_eq!(late.calls(), 1);
    assert_eq!(clock.calls(), 2);

    // A new turn starts from an empty cache.
    let mut next = ProviderCache::for_run("run-y");
    runtime
        .compose_state(&message, &ProviderFilter::only(["LATE"]), &mut next)
        .await;
    assert_eq!(late.calls(), 2);
    assert_eq!(early.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_concurrent_turns_keep_trajectories_apart() {
    let runtime = Arc::new(
        AgentRuntime::builder(EngineConfig::default())
            .model(Arc::new(PlanModel::replying(
                "<actions>FETCH_A,FETCH_B</actions><text>ok</text>",
            )))
            .action(Arc::new(ScriptedAction::new("FETCH_A", Step::AskModel)))
            .action(Arc::new(ScriptedAction::new("FETCH_B", Step::AskModel)))
            .build()
            .unwrap(),
    );

    let turns = (0..6).map(|i| {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(i % 3)).await;
            runtime
                .process(&Message::new("u", format!("room-{i}"), format!("turn {i}")))
                .await
        })
    });
    let results: Vec<_> = futures::future::join_all(turns)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let mut all_steps = HashSet::new();
    for (i, result) in results.iter().enumerate() {
        let trace = runtime.recorder().get_trace(&result.run_id).unwrap();
        let step_ids: HashSet<String> = result
            .plan
            .steps
            .iter()
            .filter_map(|s| s.trajectory_step.clone())
            .collect();
        assert_eq!(step_ids.len(), 2);

        // The turn's own model call has no step; each action's call carries
        // exactly the step that made it.
        let model_spans: Vec<_> = trace
            .spans
            .iter()
            .filter(|s| s.kind == SpanKind::ModelCall)
            .collect();
        assert_eq!(model_spans.len(), 3);
        assert_eq!(model_spans.iter().filter(|s| s.trajectory_step.is_none()).count(), 1);
        for step in &step_ids {
            let spans: Vec<_> = trace.spans_for_step(step).collect();
            assert_eq!(spans.len(), 2, "one action span and one model span per step");
            assert!(spans.iter().any(|s| s.kind == SpanKind::ModelCall));
        }
        for text in result.state.data.action_results.iter().filter_map(|r| r.text.as_deref()) {
            assert!(text.starts_with(&format!("ack: lookup: turn {i} step")));
        }
        all_steps.extend(step_ids);
    }
    assert_eq!(all_steps.len(), 12);
}
