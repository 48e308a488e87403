//! Default context providers.

use async_trait::async_trait;
use cadence_core::error::{ProviderError, StoreError};
use cadence_core::{ContextProvider, ProviderContext, ProviderResult, Value};
use chrono::Utc;
use std::fmt::Write;
use std::sync::Arc;

use crate::registry::ActionRegistry;

/// Lists the registered actions so the model knows what it may plan.
pub struct ActionsProvider {
    actions: Arc<ActionRegistry>,
}

impl ActionsProvider {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl ContextProvider for ActionsProvider {
    fn name(&self) -> &str {
        "ACTIONS"
    }

    fn description(&self) -> &str {
        "Actions the agent can take this turn"
    }

    fn position(&self) -> i32 {
        -1
    }

    async fn get(&self, _ctx: &ProviderContext<'_>) -> Result<ProviderResult, ProviderError> {
        if self.actions.is_empty() {
            return Ok(ProviderResult::empty());
        }
        let mut text = String::from("# Available Actions");
        for action in self.actions.iter() {
            let _ = write!(text, "\n- {}", action.name());
            if !action.description().is_empty() {
                let _ = write!(text, ": {}", action.description());
            }
        }
        let names: Vec<Value> = self.actions.names().into_iter().map(Value::from).collect();
        Ok(ProviderResult::text(text)
            .with_value("actionNames", self.actions.names().join(", "))
            .with_data("actions", names))
    }
}

/// The room's recent conversation, oldest first.
pub struct RecentMessagesProvider {
    limit: usize,
}

impl RecentMessagesProvider {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl ContextProvider for RecentMessagesProvider {
    fn name(&self) -> &str {
        "RECENT_MESSAGES"
    }

    fn description(&self) -> &str {
        "Recent messages in the current room"
    }

    fn position(&self) -> i32 {
        10
    }

    async fn get(&self, ctx: &ProviderContext<'_>) -> Result<ProviderResult, ProviderError> {
        // One extra so the current message can be dropped and still fill the window.
        let history = ctx
            .store
            .recent_messages(&ctx.message.room_id, self.limit + 1)
            .await
            .map_err(|e| match e {
                StoreError::Unavailable(reason) => ProviderError::Unavailable(reason),
                other => ProviderError::Failed {
                    provider: self.name().to_string(),
                    reason: other.to_string(),
                },
            })?;

        let prior: Vec<_> = history
            .iter()
            .filter(|m| m.id != ctx.message.id)
            .collect();
        let prior = &prior[prior.len().saturating_sub(self.limit)..];
        if prior.is_empty() {
            return Ok(ProviderResult::empty().with_value("recentMessageCount", 0_i64));
        }

        let mut text = String::from("# Conversation so far");
        for m in prior {
            let _ = write!(text, "\n{}: {}", m.entity_id, m.text());
        }
        Ok(ProviderResult::text(text).with_value("recentMessageCount", prior.len()))
    }
}

/// Current UTC time, recomputed on every composition.
pub struct TimeProvider;

#[async_trait]
impl ContextProvider for TimeProvider {
    fn name(&self) -> &str {
        "TIME"
    }

    fn description(&self) -> &str {
        "The current date and time"
    }

    fn position(&self) -> i32 {
        100
    }

    fn dynamic(&self) -> bool {
        true
    }

    async fn get(&self, _ctx: &ProviderContext<'_>) -> Result<ProviderResult, ProviderError> {
        let now = Utc::now();
        Ok(
            ProviderResult::text(format!("The current time is {}.", now.format("%Y-%m-%d %H:%M UTC")))
                .with_value("currentTime", now.to_rfc3339()),
        )
    }
}
