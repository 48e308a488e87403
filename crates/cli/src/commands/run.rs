//! `cadence run`: handle one message end to end.
//!
//! There is no network model client here: the reply comes from a file, or
//! the message is echoed back through a well-formed `<response>` so the
//! whole pipeline still runs.

use async_trait::async_trait;
use cadence_config::EngineConfig;
use cadence_core::error::{DeliveryError, ModelError};
use cadence_core::{Content, GenerateOptions, Message, ModelClient, OutboundSink};
use cadence_runtime::{AgentRuntime, Mapping, Node, encode};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub struct RunOptions {
    pub message: String,
    pub reply_file: Option<PathBuf>,
    pub room: String,
    pub sender: String,
    pub json: bool,
}

/// Returns the same canned reply for every prompt.
struct CannedModel {
    reply: String,
}

#[async_trait]
impl ModelClient for CannedModel {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, ModelError> {
        Ok(self.reply.clone())
    }
}

/// Prints delivered responses to stdout.
struct ConsoleChannel {
    agent_name: String,
    quiet: bool,
}

#[async_trait]
impl OutboundSink for ConsoleChannel {
    async fn deliver(&self, _room_id: &str, content: &Content) -> Result<(), DeliveryError> {
        if !self.quiet {
            println!("{}: {}", self.agent_name, content.text);
        }
        Ok(())
    }
}

fn echo_reply(text: &str) -> String {
    let mut reply = Mapping::new();
    reply.insert("thought", Node::from("Echo the message back."));
    reply.insert("actions", Node::from("REPLY"));
    reply.insert("text", Node::Text(format!("You said: {text}")));
    encode(&reply)
}

pub async fn run(config: EngineConfig, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let reply = match &options.reply_file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read reply file {}: {e}", path.display()))?,
        None => echo_reply(&options.message),
    };

    let agent_name = config.agent_name.clone();
    let runtime = AgentRuntime::builder(config)
        .model(Arc::new(CannedModel { reply }))
        .outbound(Arc::new(ConsoleChannel {
            agent_name,
            quiet: options.json,
        }))
        .build()?;

    debug!(room = %options.room, sender = %options.sender, "Running a single turn");
    let message = Message::new(options.sender, options.room, options.message);
    let turn = runtime.process(&message).await;
    runtime.stop().await;

    if options.json {
        let out = serde_json::json!({
            "run_id": turn.run_id,
            "outcome": turn.outcome,
            "error": turn.error,
            "responses": turn.responses,
            "plan": turn.plan,
            "evaluations": turn.evaluations,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("   Run:      {}", turn.run_id);
    println!("   Outcome:  {:?}", turn.outcome);
    if !turn.plan.thought.is_empty() {
        println!("   Thought:  {}", turn.plan.thought);
    }
    for (i, step) in turn.plan.steps.iter().enumerate() {
        match &step.error {
            Some(error) => println!("   [{}] {} ({}: {error})", i + 1, step.action, step.status),
            None => println!("   [{}] {} ({})", i + 1, step.action, step.status),
        }
    }
    for eval in &turn.evaluations {
        println!("   Eval {}: {} ({})", eval.name, eval.score, eval.reason);
    }
    if let Some(error) = &turn.error {
        println!("   Error:    {error}");
    }
    Ok(())
}
