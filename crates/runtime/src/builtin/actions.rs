//! `REPLY` and `IGNORE`.

use async_trait::async_trait;
use cadence_core::error::ActionError;
use cadence_core::{Action, ActionContext, ActionResult, Content, GenerateOptions};

/// Sends the model's reply text to the room.
///
/// Uses the `text` the model already produced; when the reply carried no
/// text, asks the model for one against the composed context.
pub struct ReplyAction {
    name: String,
    similes: Vec<String>,
}

impl ReplyAction {
    pub fn new() -> Self {
        Self::named("REPLY")
    }

    /// A reply action registered under a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            similes: ["RESPOND", "ANSWER", "GREET"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    fn prompt(ctx: &ActionContext<'_>) -> String {
        format!(
            "{}\n\nWrite the next reply to this message:\n{}",
            ctx.state.text,
            ctx.message.text()
        )
    }
}

impl Default for ReplyAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for ReplyAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn similes(&self) -> &[String] {
        &self.similes
    }

    fn description(&self) -> &str {
        "Reply to the current conversation with a message."
    }

    async fn handle(&self, ctx: &ActionContext<'_>) -> Result<Option<ActionResult>, ActionError> {
        let text = match ctx.response.text.trim() {
            "" => ctx
                .model
                .generate(&Self::prompt(ctx), &GenerateOptions::large())
                .await
                .map_err(|e| ActionError::Failed(e.to_string()))?
                .trim()
                .to_string(),
            text => text.to_string(),
        };
        if text.is_empty() {
            return Err(ActionError::Failed("nothing to reply with".into()));
        }

        let mut content = Content::text(text.clone()).with_actions([self.name.clone()]);
        content.thought = ctx.response.thought.clone();
        ctx.sink
            .send(content)
            .await
            .map_err(|e| ActionError::Delivery(e.to_string()))?;

        Ok(Some(ActionResult::ok(text)))
    }
}

/// Deliberately says nothing.
pub struct IgnoreAction {
    similes: Vec<String>,
}

impl IgnoreAction {
    pub fn new() -> Self {
        Self {
            similes: vec!["STOP_TALKING".into(), "NO_RESPONSE".into()],
        }
    }
}

impl Default for IgnoreAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for IgnoreAction {
    fn name(&self) -> &str {
        "IGNORE"
    }

    fn similes(&self) -> &[String] {
        &self.similes
    }

    fn description(&self) -> &str {
        "Do not respond to this message."
    }

    async fn handle(&self, _ctx: &ActionContext<'_>) -> Result<Option<ActionResult>, ActionError> {
        Ok(None)
    }
}
