//! The turn coordinator.
//!
//! One call to [`AgentRuntime::handle_message`] is one turn:
//!
//! 1. **Receive** the message, persist it, load room/entity/world snapshots
//! 2. **Compose** the State from the context providers
//! 3. **Generate** a reply from the model with the rendered prompt
//! 4. **Plan** actions from the decoded reply
//! 5. **Execute** the plan step by step
//! 6. **Evaluate** the closed plan
//! 7. **Record** the turn and announce its end
//!
//! Failures are captured as data wherever the turn can still answer. A
//! plan that partly fails without replying answers with what it completed.
//! Only an unreachable store aborts a turn, and even then the room gets the
//! fallback response.

use cadence_config::EngineConfig;
use cadence_core::error::{Error, ModelError};
use cadence_core::event::{EntityPayload, MessagePayload, RunPayload, WorldPayload};
use cadence_core::{
    Action, ActionPlan, Content, ContextProvider, Entity, Evaluator, EvaluatorContext,
    EvaluatorResult, EventPayload, EventType, GenerateOptions, MemoryStore, Message, ModelClient,
    OutboundSink, ResponseSink, Room, Service, State, StepStatus, TurnOutcome, TurnRecord, World,
};
use cadence_memory::InMemoryStore;
use cadence_telemetry::{Span, SpanKind, TrajectoryRecorder};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builtin::{ActionsProvider, IgnoreAction, RecentMessagesProvider, ReplyAction, TimeProvider};
use crate::composer::{ProviderCache, ProviderFilter, StateComposer, render_prompt};
use crate::decoder::{Mapping, decode};
use crate::dispatcher::{EventDispatcher, EventHandler};
use crate::evaluators::EvaluatorRunner;
use crate::executor::{ActionExecutor, ExecutionContext};
use crate::isolate::{Isolated, isolate};
use crate::planner::build_plan;
use crate::registry::{ActionRegistry, EvaluatorRegistry, ProviderRegistry, ServiceRegistry};
use crate::traced_model::TracedModel;

const PREVIEW_CHARS: usize = 120;

/// Everything one turn produced.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub run_id: String,
    /// Responses sent to the room, in order.
    pub responses: Vec<Content>,
    /// The closed plan (empty when the model could not be reached).
    pub plan: ActionPlan,
    pub evaluations: Vec<EvaluatorResult>,
    pub state: State,
    pub outcome: TurnOutcome,
    /// Why the turn was aborted, if it was.
    pub error: Option<String>,
}

impl TurnResult {
    /// Text of every response, joined by blank lines.
    pub fn text(&self) -> String {
        self.responses
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Builder for [`AgentRuntime`]. Registration happens here; the built
/// runtime's catalogs are read-only.
pub struct AgentRuntimeBuilder {
    config: EngineConfig,
    model: Option<Arc<dyn ModelClient>>,
    store: Option<Arc<dyn MemoryStore>>,
    outbound: Option<Arc<dyn OutboundSink>>,
    providers: Vec<Arc<dyn ContextProvider>>,
    actions: Vec<Arc<dyn Action>>,
    evaluators: Vec<Arc<dyn Evaluator>>,
    services: Vec<Arc<dyn Service>>,
    builtins: bool,
}

impl AgentRuntimeBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            model: None,
            store: None,
            outbound: None,
            providers: Vec::new(),
            actions: Vec::new(),
            evaluators: Vec::new(),
            services: Vec::new(),
            builtins: true,
        }
    }

    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    /// Defaults to an [`InMemoryStore`].
    pub fn store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Where [`AgentRuntime::process`] delivers responses.
    pub fn outbound(mut self, outbound: Arc<dyn OutboundSink>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    /// Skip the built-in actions and providers.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    /// Freeze the registries and start the event worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<AgentRuntime, Error> {
        self.config
            .validate()
            .map_err(|e| Error::Internal(format!("invalid configuration: {e}")))?;
        let model = self
            .model
            .ok_or_else(|| Error::Registration("no model client configured".into()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()) as Arc<dyn MemoryStore>);

        let mut actions = ActionRegistry::new();
        for action in self.actions {
            actions.register(action)?;
        }
        if self.builtins {
            let builtin: [Arc<dyn Action>; 2] = [
                Arc::new(ReplyAction::named(self.config.reply_action.clone())),
                Arc::new(IgnoreAction::new()),
            ];
            for action in builtin {
                if actions.get(action.name()).is_none() {
                    actions.register(action)?;
                }
            }
        }
        let actions = Arc::new(actions);

        let mut providers = ProviderRegistry::new();
        for provider in self.providers {
            providers.register(provider)?;
        }
        if self.builtins {
            let builtin: [Arc<dyn ContextProvider>; 3] = [
                Arc::new(ActionsProvider::new(actions.clone())),
                Arc::new(RecentMessagesProvider::new(
                    self.config.composer.recent_message_limit,
                )),
                Arc::new(TimeProvider),
            ];
            for provider in builtin {
                if providers.get(provider.name()).is_none() {
                    providers.register(provider)?;
                }
            }
        }
        let providers = Arc::new(providers);

        let mut evaluators = EvaluatorRegistry::new();
        for evaluator in self.evaluators {
            evaluators.register(evaluator)?;
        }
        let evaluators = Arc::new(evaluators);

        let mut services = ServiceRegistry::new();
        for service in self.services {
            services.register(service)?;
        }

        let recorder = Arc::new(if self.config.telemetry.enabled {
            TrajectoryRecorder::new(self.config.telemetry.max_spans)
        } else {
            TrajectoryRecorder::disabled()
        });
        let events = EventDispatcher::with_handler_timeout(
            self.config.events.queue_capacity,
            self.config.events.tap_capacity,
            self.config.timeouts.event_handler(),
        );

        let timeouts = &self.config.timeouts;
        let composer = StateComposer::new(
            providers.clone(),
            store.clone(),
            recorder.clone(),
            self.config.agent_name.clone(),
            timeouts.provider(),
        );
        let executor = ActionExecutor::new(
            actions.clone(),
            events.clone(),
            recorder.clone(),
            timeouts.action(),
        );
        let runner = EvaluatorRunner::new(
            evaluators.clone(),
            events.clone(),
            recorder.clone(),
            timeouts.evaluator(),
        );

        info!(
            agent = %self.config.agent_name,
            providers = providers.len(),
            actions = actions.len(),
            evaluators = evaluators.len(),
            services = services.len(),
            "Runtime built"
        );

        Ok(AgentRuntime {
            config: self.config,
            model,
            store,
            outbound: self.outbound,
            providers,
            actions,
            evaluators,
            services,
            events,
            recorder,
            composer,
            executor,
            runner,
        })
    }
}

/// The per-message orchestration engine. Share it across concurrent turns
/// behind an `Arc`.
pub struct AgentRuntime {
    config: EngineConfig,
    model: Arc<dyn ModelClient>,
    store: Arc<dyn MemoryStore>,
    outbound: Option<Arc<dyn OutboundSink>>,
    providers: Arc<ProviderRegistry>,
    actions: Arc<ActionRegistry>,
    evaluators: Arc<EvaluatorRegistry>,
    services: ServiceRegistry,
    events: EventDispatcher,
    recorder: Arc<TrajectoryRecorder>,
    composer: StateComposer,
    executor: ActionExecutor,
    runner: EvaluatorRunner,
}

impl AgentRuntime {
    pub fn builder(config: EngineConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn evaluators(&self) -> &EvaluatorRegistry {
        &self.evaluators
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn recorder(&self) -> &Arc<TrajectoryRecorder> {
        &self.recorder
    }

    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.events.subscribe(event_type, handler);
    }

    /// Compose a State outside of a turn, e.g. for an action that needs a
    /// narrower context. Pass the turn's cache to reuse static results.
    pub async fn compose_state(
        &self,
        message: &Message,
        filter: &ProviderFilter,
        cache: &mut ProviderCache,
    ) -> State {
        self.composer.compose_state(message, filter, cache).await
    }

    /// Run a turn, delivering responses to the configured outbound sink.
    pub async fn process(&self, message: &Message) -> TurnResult {
        let sink = match &self.outbound {
            Some(outbound) => ResponseSink::with_outbound(message.room_id.clone(), outbound.clone()),
            None => ResponseSink::new(message.room_id.clone()),
        };
        self.handle_message(message, &sink).await
    }

    /// Run one turn for `message`, sending responses through `sink`.
    pub async fn handle_message(&self, message: &Message, sink: &ResponseSink) -> TurnResult {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        // Dropping this turn mid-flight still closes its trace.
        let _trace = self.recorder.start_guarded(&run_id, &message.room_id);
        let turn_span = Span::new(SpanKind::Turn, message.id.clone());

        info!(
            run_id = %run_id,
            message_id = %message.id,
            room_id = %message.room_id,
            preview = %message.preview(PREVIEW_CHARS),
            "Turn started"
        );
        self.events
            .notify(
                EventType::MessageReceived,
                EventPayload::Message(MessagePayload {
                    message_id: message.id.clone(),
                    room_id: message.room_id.clone(),
                    entity_id: message.entity_id.clone(),
                    text_preview: message.preview(PREVIEW_CHARS),
                }),
            )
            .await;
        self.announce_run(EventType::RunStarted, &run_id, message, None, None, None)
            .await;

        if let Err(e) = self.store.save_message(message).await {
            let err = Error::from(e);
            if err.is_fatal() {
                return self
                    .abort(run_id, message, sink, err, started, turn_span)
                    .await;
            }
            warn!(run_id = %run_id, error = %err, "Could not persist message, continuing");
        }

        let mut state = State::new();
        self.load_snapshots(&mut state, message).await;

        let mut cache = ProviderCache::for_run(run_id.clone());
        self.composer
            .compose_into(&mut state, message, &ProviderFilter::All, &mut cache)
            .await;

        let model = TracedModel::new(
            self.model.clone(),
            self.events.clone(),
            self.recorder.clone(),
            run_id.clone(),
        );

        let plan = match self.generate(&model, &state).await {
            Ok(reply) => {
                let decoded = decode(&reply);
                if decoded.is_none() {
                    debug!(run_id = %run_id, "Model reply had no tags");
                }
                let response = response_content(decoded.as_ref(), &reply);
                let plan = build_plan(decoded.as_ref(), &self.actions, &self.config.reply_action);
                let cx = ExecutionContext {
                    run_id: &run_id,
                    message,
                    response: &response,
                    sink,
                    model: &model,
                    store: self.store.as_ref(),
                };
                self.executor.execute_plan(plan, &mut state, &cx).await
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Model generation failed, no plan executed");
                let plan = ActionPlan::default();
                state.data.action_plan = Some(plan.clone());
                plan
            }
        };

        if sink.is_empty() {
            if plan.completed_count() == 0 {
                info!(run_id = %run_id, "Turn produced no output, sending fallback");
                self.send_fallback(&run_id, sink).await;
            } else if plan.failed_count() > 0 {
                info!(run_id = %run_id, "Plan partly failed, sending what completed");
                let content = Content::text(partial_response(&plan));
                if let Err(e) = sink.send(content).await {
                    warn!(run_id = %run_id, error = %e, "Could not deliver partial response");
                }
            }
        }

        let responses = sink.responses();
        let evaluations = self
            .runner
            .run_evaluators(
                &run_id,
                &EvaluatorContext {
                    message,
                    state: &state,
                    plan: &plan,
                    responses: &responses,
                    model: &model,
                    store: self.store.as_ref(),
                },
            )
            .await;

        let outcome = plan.outcome();
        let record = TurnRecord {
            run_id: run_id.clone(),
            message: message.clone(),
            plan: plan.clone(),
            evaluations: evaluations.clone(),
            state: state.clone(),
            outcome,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.save_turn(&record).await {
            warn!(run_id = %run_id, error = %e, "Could not persist turn record");
        }

        self.finish(&run_id, message, &responses, outcome, None, started, turn_span)
            .await;

        TurnResult {
            run_id,
            responses,
            plan,
            evaluations,
            state,
            outcome,
            error: None,
        }
    }

    /// Register the entity, room and world a message will arrive from,
    /// announcing joins and updates.
    pub async fn ensure_connection(
        &self,
        entity: Entity,
        room: Room,
        world: Option<World>,
        source: &str,
    ) -> Result<(), Error> {
        if let Some(world) = world {
            let known = self.store.get_world(&world.id).await?.is_some();
            let payload = WorldPayload {
                world_id: world.id.clone(),
                name: world.name.clone(),
                source: source.to_string(),
            };
            self.store.upsert_world(world).await?;
            if !known {
                self.events
                    .notify(EventType::WorldJoined, EventPayload::World(payload))
                    .await;
            }
        }

        let world_id = room.world_id.clone();
        self.store.upsert_room(room).await?;

        let existing = self.store.get_entity(&entity.id).await?;
        let event_type = match &existing {
            None => Some(EventType::EntityJoined),
            Some(previous) if *previous != entity => Some(EventType::EntityUpdated),
            Some(_) => None,
        };
        let payload = EntityPayload {
            entity_id: entity.id.clone(),
            world_id,
            source: source.to_string(),
        };
        self.store.upsert_entity(entity).await?;
        if let Some(event_type) = event_type {
            self.events
                .notify(event_type, EventPayload::Entity(payload))
                .await;
        }
        Ok(())
    }

    /// Stop every registered service.
    pub async fn stop(&self) {
        let errors = self.services.stop_all().await;
        if errors.is_empty() {
            info!("Runtime stopped");
        } else {
            warn!(failures = errors.len(), "Runtime stopped with service errors");
        }
        if let Err(e) = self.events.flush().await {
            warn!(error = %e, "Could not flush pending events");
        }
    }

    async fn generate(&self, model: &TracedModel, state: &State) -> Result<String, Error> {
        let prompt = render_prompt(&self.config.prompt_template, state)
            .map_err(|e| Error::Internal(format!("prompt template: {e}")))?;
        isolate(
            self.config.timeouts.model(),
            model.generate(&prompt, &GenerateOptions::large()),
        )
        .await
        .map_err(|e| match e {
            Isolated::Failed(e) => Error::Model(e),
            Isolated::TimedOut(limit) => Error::Model(ModelError::Timeout(limit.as_millis() as u64)),
            Isolated::Panicked(msg) => Error::Internal(format!("model client panicked: {msg}")),
        })
    }

    async fn load_snapshots(&self, state: &mut State, message: &Message) {
        match self.store.get_room(&message.room_id).await {
            Ok(room) => state.data.room = room,
            Err(e) => warn!(room_id = %message.room_id, error = %e, "Could not load room"),
        }
        if let Some(world_id) = state.data.room.as_ref().and_then(|r| r.world_id.clone()) {
            match self.store.get_world(&world_id).await {
                Ok(world) => state.data.world = world,
                Err(e) => warn!(world_id = %world_id, error = %e, "Could not load world"),
            }
        }
        match self.store.get_entity(&message.entity_id).await {
            Ok(entity) => state.data.entity = entity,
            Err(e) => warn!(entity_id = %message.entity_id, error = %e, "Could not load entity"),
        }

        let sender = state
            .data
            .entity
            .as_ref()
            .and_then(|e| e.names.first().cloned())
            .unwrap_or_else(|| message.entity_id.clone());
        state.set_value("agentName", self.config.agent_name.clone());
        state.set_value("senderName", sender);
        state.set_value("roomId", message.room_id.clone());
        state.set_value("messageText", message.text());
    }

    async fn send_fallback(&self, run_id: &str, sink: &ResponseSink) {
        let content = Content::text(self.config.fallback_response.clone());
        if let Err(e) = sink.send(content).await {
            warn!(run_id, error = %e, "Could not deliver fallback response");
        }
    }

    async fn abort(
        &self,
        run_id: String,
        message: &Message,
        sink: &ResponseSink,
        error: Error,
        started: Instant,
        turn_span: Span,
    ) -> TurnResult {
        warn!(run_id = %run_id, error = %error, "Turn aborted");
        self.send_fallback(&run_id, sink).await;
        let responses = sink.responses();
        let reason = error.to_string();
        self.finish(
            &run_id,
            message,
            &responses,
            TurnOutcome::Failed,
            Some(reason.clone()),
            started,
            turn_span,
        )
        .await;

        TurnResult {
            run_id,
            responses,
            plan: ActionPlan::default(),
            evaluations: Vec::new(),
            state: State::new(),
            outcome: TurnOutcome::Failed,
            error: Some(reason),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        run_id: &str,
        message: &Message,
        responses: &[Content],
        outcome: TurnOutcome,
        error: Option<String>,
        started: Instant,
        mut turn_span: Span,
    ) {
        for response in responses {
            self.events
                .notify(
                    EventType::MessageSent,
                    EventPayload::Message(MessagePayload {
                        message_id: message.id.clone(),
                        room_id: message.room_id.clone(),
                        entity_id: self.config.agent_name.clone(),
                        text_preview: preview(&response.text),
                    }),
                )
                .await;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        match &error {
            Some(e) => turn_span.fail(e.clone()),
            None => turn_span.end(outcome != TurnOutcome::Failed),
        }
        self.recorder.record_span(run_id, turn_span);
        self.recorder.end_trace(run_id);

        self.announce_run(
            EventType::RunEnded,
            run_id,
            message,
            Some(outcome),
            Some(duration_ms),
            error,
        )
        .await;
        info!(run_id, ?outcome, duration_ms, responses = responses.len(), "Turn finished");
    }

    async fn announce_run(
        &self,
        event_type: EventType,
        run_id: &str,
        message: &Message,
        outcome: Option<TurnOutcome>,
        duration_ms: Option<u64>,
        error: Option<String>,
    ) {
        self.events
            .notify(
                event_type,
                EventPayload::Run(RunPayload {
                    run_id: run_id.to_string(),
                    message_id: message.id.clone(),
                    room_id: message.room_id.clone(),
                    outcome,
                    duration_ms,
                    error,
                }),
            )
            .await;
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

/// What a partly failed plan tells the room when none of its steps replied:
/// the completed steps' result text, then which steps failed.
fn partial_response(plan: &ActionPlan) -> String {
    let mut lines: Vec<String> = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .filter_map(|s| s.result.as_ref()?.text.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(String::from)
        .collect();

    let failed: Vec<String> = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| match &s.error {
            Some(error) => format!("{} ({error})", s.action),
            None => s.action.clone(),
        })
        .collect();
    lines.push(format!("Could not finish: {}.", failed.join(", ")));
    lines.join("\n")
}

/// The response content a plan's actions work from. An untagged reply is
/// taken as plain reply text.
fn response_content(decoded: Option<&Mapping>, raw: &str) -> Content {
    match decoded {
        Some(m) => Content {
            text: m.text("text").unwrap_or_default().to_string(),
            thought: m.text("thought").map(String::from),
            actions: m.list("actions"),
            ..Default::default()
        },
        None => Content::text(raw.trim()),
    }
}
