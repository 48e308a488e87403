//! Shared test doubles for runtime unit tests.

use async_trait::async_trait;
use cadence_core::error::{ActionError, EvaluatorError, ModelError, ProviderError};
use cadence_core::{
    Action, ActionContext, ActionResult, Content, ContextProvider, Evaluator, EvaluatorContext,
    EvaluatorResult, GenerateOptions, ModelClient, ProviderContext, ProviderResult,
};
use cadence_telemetry::{TrajectoryStepId, current_step};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ── Model ─────────────────────────────────────────────────────────────────

/// A model that returns a sequence of scripted replies.
///
/// Each call to `generate` pops the next reply; an exhausted script
/// returns an error.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<String>>,
    steps: Mutex<Vec<Option<TrajectoryStepId>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::from_results(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn from_results(replies: Vec<Result<String, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            steps: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self::from_results(vec![Err(ModelError::RequestFailed(reason.into()))])
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// The trajectory step bound during each call, in call order.
    pub fn observed_steps(&self) -> Vec<Option<TrajectoryStepId>> {
        self.steps.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.steps.lock().unwrap().push(current_step());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::RequestFailed("script exhausted".into())))
    }
}

// ── Providers ─────────────────────────────────────────────────────────────

/// A provider that returns fixed text and counts its invocations.
pub struct StaticProvider {
    name: String,
    position: i32,
    text: String,
    dynamic: bool,
    private: bool,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(name: &str, position: i32, text: &str) -> Self {
        Self {
            name: name.into(),
            position,
            text: text.into(),
            dynamic: false,
            private: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> i32 {
        self.position
    }

    fn dynamic(&self) -> bool {
        self.dynamic
    }

    fn private(&self) -> bool {
        self.private
    }

    async fn get(&self, _ctx: &ProviderContext<'_>) -> Result<ProviderResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderResult::text(self.text.clone()).with_value(self.name.to_lowercase(), self.text.as_str()))
    }
}

/// How a [`BrokenProvider`] misbehaves.
pub enum Breakage {
    Error,
    Panic,
    Hang,
}

pub struct BrokenProvider {
    name: String,
    position: i32,
    breakage: Breakage,
}

impl BrokenProvider {
    pub fn new(name: &str, position: i32, breakage: Breakage) -> Self {
        Self {
            name: name.into(),
            position,
            breakage,
        }
    }
}

#[async_trait]
impl ContextProvider for BrokenProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> i32 {
        self.position
    }

    async fn get(&self, _ctx: &ProviderContext<'_>) -> Result<ProviderResult, ProviderError> {
        match self.breakage {
            Breakage::Error => Err(ProviderError::Failed {
                provider: self.name.clone(),
                reason: "backend offline".into(),
            }),
            Breakage::Panic => panic!("provider bug"),
            Breakage::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ProviderResult::text("too late"))
            }
        }
    }
}

// ── Actions ───────────────────────────────────────────────────────────────

/// What a [`StubAction`] handler does.
#[derive(Clone)]
pub enum Behavior {
    /// Send the text to the sink and succeed with it.
    Reply(String),
    /// Succeed with the text without sending anything.
    Succeed(String),
    /// Return `Ok(None)`.
    Silent,
    /// Return `Err(ActionError::Failed)`.
    Fail(String),
    /// Return an `ActionResult` with `success: false`.
    Report(String),
    Panic,
    Hang,
    /// Call the model once and succeed with its reply.
    AskModel,
}

pub struct StubAction {
    name: String,
    similes: Vec<String>,
    behavior: Behavior,
    blocking: bool,
    valid: bool,
    calls: AtomicUsize,
    previous: Mutex<Vec<usize>>,
    steps: Mutex<Vec<Option<TrajectoryStepId>>>,
}

impl StubAction {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            similes: Vec::new(),
            behavior,
            blocking: false,
            valid: true,
            calls: AtomicUsize::new(0),
            previous: Mutex::new(Vec::new()),
            steps: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(name: &str, text: &str) -> Self {
        Self::new(name, Behavior::Succeed(text.into()))
    }

    pub fn replying(name: &str, text: &str) -> Self {
        Self::new(name, Behavior::Reply(text.into()))
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self::new(name, Behavior::Fail(error.into()))
    }

    pub fn with_similes(mut self, similes: &[&str]) -> Self {
        self.similes = similes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `previous_results.len()` seen by each invocation.
    pub fn previous_seen(&self) -> Vec<usize> {
        self.previous.lock().unwrap().clone()
    }

    pub fn steps_seen(&self) -> Vec<Option<TrajectoryStepId>> {
        self.steps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Action for StubAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn similes(&self) -> &[String] {
        &self.similes
    }

    fn blocking(&self) -> bool {
        self.blocking
    }

    async fn validate(&self, _ctx: &ActionContext<'_>) -> bool {
        self.valid
    }

    async fn handle(&self, ctx: &ActionContext<'_>) -> Result<Option<ActionResult>, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.previous.lock().unwrap().push(ctx.previous_results.len());
        self.steps.lock().unwrap().push(current_step());

        match &self.behavior {
            Behavior::Reply(text) => {
                ctx.sink
                    .send(Content::text(text.clone()).with_actions([self.name.clone()]))
                    .await
                    .map_err(|e| ActionError::Delivery(e.to_string()))?;
                Ok(Some(ActionResult::ok(text.clone())))
            }
            Behavior::Succeed(text) => Ok(Some(ActionResult::ok(text.clone()))),
            Behavior::Silent => Ok(None),
            Behavior::Fail(error) => Err(ActionError::Failed(error.clone())),
            Behavior::Report(error) => Ok(Some(ActionResult::failure(error.clone()))),
            Behavior::Panic => panic!("action bug"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
            Behavior::AskModel => {
                let reply = ctx
                    .model
                    .generate("nested", &GenerateOptions::small())
                    .await
                    .map_err(|e| ActionError::Failed(e.to_string()))?;
                Ok(Some(ActionResult::ok(reply)))
            }
        }
    }
}

// ── Evaluators ────────────────────────────────────────────────────────────

pub enum Verdict {
    Score(u32),
    Fail(String),
    Panic,
    Hang,
}

pub struct StubEvaluator {
    name: String,
    verdict: Verdict,
    valid: bool,
    always_run: bool,
    calls: AtomicUsize,
}

impl StubEvaluator {
    pub fn new(name: &str, verdict: Verdict) -> Self {
        Self {
            name: name.into(),
            verdict,
            valid: true,
            always_run: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scoring(name: &str, score: u32) -> Self {
        Self::new(name, Verdict::Score(score))
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn always_run(mut self) -> Self {
        self.always_run = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for StubEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn always_run(&self) -> bool {
        self.always_run
    }

    async fn validate(&self, _ctx: &EvaluatorContext<'_>) -> bool {
        self.valid
    }

    async fn evaluate(&self, ctx: &EvaluatorContext<'_>) -> Result<EvaluatorResult, EvaluatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.verdict {
            Verdict::Score(score) => Ok(EvaluatorResult::new(
                self.name.clone(),
                *score,
                *score >= 50,
                format!("{} steps completed", ctx.plan.completed_count()),
            )),
            Verdict::Fail(reason) => Err(EvaluatorError::Failed(reason.clone())),
            Verdict::Panic => panic!("evaluator bug"),
            Verdict::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(EvaluatorError::Failed("unreachable".into()))
            }
        }
    }
}
