//! Domain events: typed notifications published while turns run.
//!
//! Every event type owns exactly one payload variant, so a subscriber can
//! pattern-match its payload without guessing. `EventType::payload_kind`
//! is the table that ties the two together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{StepStatus, TurnOutcome};
use crate::error::EventError;
use crate::evaluator::EvaluatorResult;
use crate::model::ModelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    WorldJoined,
    WorldConnected,
    WorldLeft,
    EntityJoined,
    EntityLeft,
    EntityUpdated,
    MessageReceived,
    MessageSent,
    RunStarted,
    RunEnded,
    ActionStarted,
    ActionCompleted,
    EvaluatorStarted,
    EvaluatorCompleted,
    ModelUsed,
    EmbeddingGenerationRequested,
    EmbeddingGenerationCompleted,
    EmbeddingGenerationFailed,
    ControlMessage,
}

impl EventType {
    /// The payload variant this event type carries.
    pub fn payload_kind(self) -> PayloadKind {
        match self {
            Self::WorldJoined | Self::WorldConnected | Self::WorldLeft => PayloadKind::World,
            Self::EntityJoined | Self::EntityLeft | Self::EntityUpdated => PayloadKind::Entity,
            Self::MessageReceived | Self::MessageSent => PayloadKind::Message,
            Self::RunStarted | Self::RunEnded => PayloadKind::Run,
            Self::ActionStarted | Self::ActionCompleted => PayloadKind::Action,
            Self::EvaluatorStarted | Self::EvaluatorCompleted => PayloadKind::Evaluator,
            Self::ModelUsed => PayloadKind::Model,
            Self::EmbeddingGenerationRequested
            | Self::EmbeddingGenerationCompleted
            | Self::EmbeddingGenerationFailed => PayloadKind::Embedding,
            Self::ControlMessage => PayloadKind::Control,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorldJoined => "WORLD_JOINED",
            Self::WorldConnected => "WORLD_CONNECTED",
            Self::WorldLeft => "WORLD_LEFT",
            Self::EntityJoined => "ENTITY_JOINED",
            Self::EntityLeft => "ENTITY_LEFT",
            Self::EntityUpdated => "ENTITY_UPDATED",
            Self::MessageReceived => "MESSAGE_RECEIVED",
            Self::MessageSent => "MESSAGE_SENT",
            Self::RunStarted => "RUN_STARTED",
            Self::RunEnded => "RUN_ENDED",
            Self::ActionStarted => "ACTION_STARTED",
            Self::ActionCompleted => "ACTION_COMPLETED",
            Self::EvaluatorStarted => "EVALUATOR_STARTED",
            Self::EvaluatorCompleted => "EVALUATOR_COMPLETED",
            Self::ModelUsed => "MODEL_USED",
            Self::EmbeddingGenerationRequested => "EMBEDDING_GENERATION_REQUESTED",
            Self::EmbeddingGenerationCompleted => "EMBEDDING_GENERATION_COMPLETED",
            Self::EmbeddingGenerationFailed => "EMBEDDING_GENERATION_FAILED",
            Self::ControlMessage => "CONTROL_MESSAGE",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    World,
    Entity,
    Message,
    Run,
    Action,
    Evaluator,
    Model,
    Embedding,
    Control,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldPayload {
    pub world_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityPayload {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: String,
    pub room_id: String,
    pub entity_id: String,
    pub text_preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPayload {
    pub run_id: String,
    pub message_id: String,
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TurnOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPayload {
    pub run_id: String,
    pub action: String,
    pub step_index: usize,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorPayload {
    pub run_id: String,
    pub evaluator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluatorResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPayload {
    pub model: String,
    pub kind: ModelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_step: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingPayload {
    pub memory_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPayload {
    pub room_id: String,
    /// e.g. "enable_input", "disable_input"
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// The closed set of event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    World(WorldPayload),
    Entity(EntityPayload),
    Message(MessagePayload),
    Run(RunPayload),
    Action(ActionPayload),
    Evaluator(EvaluatorPayload),
    Model(ModelPayload),
    Embedding(EmbeddingPayload),
    Control(ControlPayload),
}

impl EventPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::World(_) => PayloadKind::World,
            Self::Entity(_) => PayloadKind::Entity,
            Self::Message(_) => PayloadKind::Message,
            Self::Run(_) => PayloadKind::Run,
            Self::Action(_) => PayloadKind::Action,
            Self::Evaluator(_) => PayloadKind::Evaluator,
            Self::Model(_) => PayloadKind::Model,
            Self::Embedding(_) => PayloadKind::Embedding,
            Self::Control(_) => PayloadKind::Control,
        }
    }
}

/// A published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Build an event, rejecting a payload that does not belong to the type.
    pub fn new(event_type: EventType, payload: EventPayload) -> Result<Self, EventError> {
        if event_type.payload_kind() != payload.kind() {
            return Err(EventError::PayloadMismatch {
                event_type: event_type.to_string(),
                payload: format!("{:?}", payload.kind()),
            });
        }
        Ok(Self {
            event_type,
            payload,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> EventPayload {
        EventPayload::Control(ControlPayload {
            room_id: "room-1".into(),
            action: "disable_input".into(),
            target: None,
        })
    }

    #[test]
    fn matching_payload_is_accepted() {
        let event = Event::new(EventType::ControlMessage, control()).unwrap();
        assert_eq!(event.event_type, EventType::ControlMessage);
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let err = Event::new(EventType::ActionStarted, control()).unwrap_err();
        assert!(matches!(err, EventError::PayloadMismatch { .. }));
        assert!(err.to_string().contains("ACTION_STARTED"));
    }

    #[test]
    fn event_type_serializes_screaming_case() {
        let json = serde_json::to_string(&EventType::EvaluatorCompleted).unwrap();
        assert_eq!(json, "\"EVALUATOR_COMPLETED\"");
        assert_eq!(EventType::EvaluatorCompleted.as_str(), "EVALUATOR_COMPLETED");
    }

    #[test]
    fn every_type_maps_to_a_kind() {
        assert_eq!(EventType::WorldConnected.payload_kind(), PayloadKind::World);
        assert_eq!(EventType::EmbeddingGenerationFailed.payload_kind(), PayloadKind::Embedding);
        assert_eq!(EventType::RunEnded.payload_kind(), PayloadKind::Run);
    }
}
