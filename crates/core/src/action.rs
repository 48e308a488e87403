//! Action trait and the action plan model.
//!
//! Actions are what give the agent the ability to act: reply, look up an
//! order, post a message. The model's reply is turned into an `ActionPlan`
//! whose steps run strictly in order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ResponseSink;
use crate::error::ActionError;
use crate::memory::MemoryStore;
use crate::message::{Content, Message};
use crate::model::ModelClient;
use crate::state::State;
use crate::value::{Value, ValueMap};

/// One line of an example conversation shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExample {
    pub name: String,
    pub content: Content,
}

/// The outcome of running an action handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub data: ValueMap,
}

impl ActionResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlanStep {
    /// Registered name of the action this step runs.
    pub action: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    /// Trajectory step id the handler ran under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionPlanStep {
    pub fn pending(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: StepStatus::Pending,
            error: None,
            result: None,
            trajectory_step: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn complete(&mut self, result: Option<ActionResult>) {
        self.status = StepStatus::Completed;
        self.result = result;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status != StepStatus::Pending
    }
}

/// How a turn ended, derived from its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Every step completed.
    Complete,
    /// Some steps completed, some failed.
    Partial,
    /// Nothing completed, or the turn was aborted.
    Failed,
}

/// The ordered, statused action list for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(default)]
    pub thought: String,
    pub total_steps: usize,
    /// Index of the first pending step, or `total_steps` when none remain.
    pub current_step: usize,
    pub steps: Vec<ActionPlanStep>,
}

impl ActionPlan {
    pub fn new(thought: impl Into<String>, actions: impl IntoIterator<Item = String>) -> Self {
        let steps: Vec<ActionPlanStep> = actions.into_iter().map(ActionPlanStep::pending).collect();
        Self {
            thought: thought.into(),
            total_steps: steps.len(),
            current_step: 0,
            steps,
        }
    }

    /// Recompute `current_step` from step statuses.
    pub fn refresh_cursor(&mut self) {
        self.current_step = self
            .steps
            .iter()
            .position(|s| s.status == StepStatus::Pending)
            .unwrap_or(self.total_steps);
    }

    pub fn is_closed(&self) -> bool {
        self.steps.iter().all(ActionPlanStep::is_terminal)
    }

    pub fn completed_count(&self) -> usize {
        self.count(StepStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.action.as_str()).collect()
    }

    pub fn outcome(&self) -> TurnOutcome {
        let completed = self.completed_count();
        if completed == 0 {
            TurnOutcome::Failed
        } else if completed == self.total_steps {
            TurnOutcome::Complete
        } else {
            TurnOutcome::Partial
        }
    }

    fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// What an action can see while it validates and runs.
pub struct ActionContext<'a> {
    pub message: &'a Message,
    pub state: &'a State,
    /// The decoded model response that produced the plan.
    pub response: &'a Content,
    /// Results of steps that already completed in this plan, in order.
    pub previous_results: &'a [ActionResult],
    pub step_index: usize,
    pub total_steps: usize,
    /// Sink for streamed or final output to the channel.
    pub sink: &'a ResponseSink,
    pub model: &'a dyn ModelClient,
    pub store: &'a dyn MemoryStore,
}

/// The core Action trait.
#[async_trait]
pub trait Action: Send + Sync {
    /// Unique name (e.g. "REPLY", "CANCEL_ORDER").
    fn name(&self) -> &str;

    /// Alternative names the model may use for this action.
    fn similes(&self) -> &[String] {
        &[]
    }

    fn description(&self) -> &str {
        ""
    }

    fn examples(&self) -> &[Vec<ActionExample>] {
        &[]
    }

    /// A blocking action's failure invalidates every later step.
    fn blocking(&self) -> bool {
        false
    }

    async fn validate(&self, _ctx: &ActionContext<'_>) -> bool {
        true
    }

    async fn handle(&self, ctx: &ActionContext<'_>) -> Result<Option<ActionResult>, ActionError>;
}
