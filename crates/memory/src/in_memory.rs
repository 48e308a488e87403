//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use cadence_core::error::StoreError;
use cadence_core::memory::{EmbeddingEntry, Entity, MemoryStore, Room, TurnRecord, World};
use cadence_core::message::Message;
use cadence_core::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::vector::rank_by_similarity;

#[derive(Default)]
struct Tables {
    messages: Vec<Message>,
    turns: Vec<TurnRecord>,
    entities: HashMap<String, Entity>,
    rooms: HashMap<String, Room>,
    worlds: HashMap<String, World>,
    cache: HashMap<String, Value>,
    embeddings: Vec<EmbeddingEntry>,
}

/// A `MemoryStore` that keeps everything in process memory.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }

    pub async fn turn_count(&self) -> usize {
        self.tables.read().await.turns.len()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.messages.iter().any(|m| m.id == message.id) {
            return Ok(());
        }
        tables.messages.push(message.clone());
        Ok(())
    }

    async fn recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut recent: Vec<Message> = tables
            .messages
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn save_turn(&self, record: &TurnRecord) -> Result<(), StoreError> {
        self.tables.write().await.turns.push(record.clone());
        Ok(())
    }

    async fn turns_for_room(&self, room_id: &str) -> Result<Vec<TurnRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .turns
            .iter()
            .filter(|t| t.message.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, StoreError> {
        Ok(self.tables.read().await.entities.get(id).cloned())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .entities
            .insert(entity.id.clone(), entity);
        Ok(())
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.tables.read().await.rooms.get(id).cloned())
    }

    async fn upsert_room(&self, room: Room) -> Result<(), StoreError> {
        self.tables.write().await.rooms.insert(room.id.clone(), room);
        Ok(())
    }

    async fn get_world(&self, id: &str) -> Result<Option<World>, StoreError> {
        Ok(self.tables.read().await.worlds.get(id).cloned())
    }

    async fn upsert_world(&self, world: World) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .worlds
            .insert(world.id.clone(), world);
        Ok(())
    }

    async fn get_cache(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.tables.read().await.cache.get(key).cloned())
    }

    async fn set_cache(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .cache
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn save_embedding(&self, mut entry: EmbeddingEntry) -> Result<String, StoreError> {
        if entry.vector.is_empty() {
            return Err(StoreError::Storage("embedding vector is empty".into()));
        }
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();
        self.tables.write().await.embeddings.push(entry);
        Ok(id)
    }

    async fn search_similar(
        &self,
        vector: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<EmbeddingEntry>, StoreError> {
        let tables = self.tables.read().await;
        Ok(rank_by_similarity(&tables.embeddings, vector, limit, min_score))
    }
}
