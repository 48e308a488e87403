//! Persistence interface: the engine's view of the storage backend.
//!
//! The runtime only needs a handful of operations: message history for
//! context, entity/room/world snapshots, a key/value cache, embedding
//! similarity search, and the per-turn audit record. Backends live in
//! their own crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{ActionPlan, TurnOutcome};
use crate::error::StoreError;
use crate::evaluator::EvaluatorResult;
use crate::message::Message;
use crate::state::State;
use crate::value::{Value, ValueMap};

/// A participant known to the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub metadata: ValueMap,
}

/// A conversation space (channel, DM, thread).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A server or workspace grouping rooms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A stored embedding vector with the text it was derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub id: String,
    pub room_id: Option<String>,
    pub content: String,
    pub vector: Vec<f32>,
    /// Similarity score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

/// The audit record persisted for every turn: the plan, the evaluations,
/// and the State snapshot they ran against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub run_id: String,
    pub message: Message,
    pub plan: ActionPlan,
    pub evaluations: Vec<EvaluatorResult>,
    pub state: State,
    pub outcome: TurnOutcome,
    pub created_at: DateTime<Utc>,
}

/// The persistence interface consumed by the runtime.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    fn name(&self) -> &str;

    async fn save_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Most recent messages in a room, oldest first.
    async fn recent_messages(&self, room_id: &str, limit: usize)
        -> Result<Vec<Message>, StoreError>;

    async fn save_turn(&self, record: &TurnRecord) -> Result<(), StoreError>;

    async fn turns_for_room(&self, room_id: &str) -> Result<Vec<TurnRecord>, StoreError>;

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, StoreError>;

    async fn upsert_entity(&self, entity: Entity) -> Result<(), StoreError>;

    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError>;

    async fn upsert_room(&self, room: Room) -> Result<(), StoreError>;

    async fn get_world(&self, id: &str) -> Result<Option<World>, StoreError>;

    async fn upsert_world(&self, world: World) -> Result<(), StoreError>;

    async fn get_cache(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set_cache(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn save_embedding(&self, entry: EmbeddingEntry) -> Result<String, StoreError>;

    /// Entries ranked by cosine similarity to `vector`, best first.
    async fn search_similar(
        &self,
        vector: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<EmbeddingEntry>, StoreError>;
}
