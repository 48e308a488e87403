//! Evaluator trait: post-hoc scoring and annotation of a finished turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::ActionPlan;
use crate::error::EvaluatorError;
use crate::memory::MemoryStore;
use crate::message::{Content, Message};
use crate::model::ModelClient;
use crate::state::State;
use crate::value::ValueMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorResult {
    /// Name of the evaluator that produced this result.
    pub name: String,
    /// 0–100.
    pub score: u8,
    pub passed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub details: ValueMap,
}

impl EvaluatorResult {
    pub fn new(name: impl Into<String>, score: u32, passed: bool, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score: score.min(100) as u8,
            passed,
            reason: reason.into(),
            details: ValueMap::new(),
        }
    }

    /// The result recorded for an evaluator that failed to run.
    pub fn failed(name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::new(name, 0, false, format!("evaluator failed: {error}"))
    }
}

/// What an evaluator sees: the turn after its plan closed.
pub struct EvaluatorContext<'a> {
    pub message: &'a Message,
    /// State with `data.action_plan` and `data.action_results` filled in.
    pub state: &'a State,
    pub plan: &'a ActionPlan,
    /// Everything the actions sent through the response sink.
    pub responses: &'a [Content],
    pub model: &'a dyn ModelClient,
    pub store: &'a dyn MemoryStore,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn similes(&self) -> &[String] {
        &[]
    }

    /// Run even when `validate` says no.
    fn always_run(&self) -> bool {
        false
    }

    async fn validate(&self, _ctx: &EvaluatorContext<'_>) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &EvaluatorContext<'_>) -> Result<EvaluatorResult, EvaluatorError>;
}
