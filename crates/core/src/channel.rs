//! Outbound side of a channel adapter, plus the per-turn response sink.
//!
//! Channel adapters deliver inbound `Message`s to the runtime and accept
//! outbound `Content` through `OutboundSink`. Actions never talk to the
//! adapter directly; they push into the turn's `ResponseSink`, which keeps
//! a copy for the evaluator stage and forwards to the adapter.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::DeliveryError;
use crate::message::Content;

/// Accepts outbound content for a room. Implemented by channel adapters.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn deliver(&self, room_id: &str, content: &Content) -> Result<(), DeliveryError>;
}

/// Collects everything the actions of one turn send back.
pub struct ResponseSink {
    room_id: String,
    responses: Mutex<Vec<Content>>,
    outbound: Option<Arc<dyn OutboundSink>>,
}

impl ResponseSink {
    /// A sink that only records responses.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            responses: Mutex::new(Vec::new()),
            outbound: None,
        }
    }

    /// A sink that records responses and forwards them to a channel.
    pub fn with_outbound(room_id: impl Into<String>, outbound: Arc<dyn OutboundSink>) -> Self {
        Self {
            outbound: Some(outbound),
            ..Self::new(room_id)
        }
    }

    /// Record `content` and forward it. The copy is kept even when
    /// delivery fails, so evaluators still see what the agent tried to say.
    pub async fn send(&self, content: Content) -> Result<(), DeliveryError> {
        self.lock().push(content.clone());
        match &self.outbound {
            Some(outbound) => outbound.deliver(&self.room_id, &content).await,
            None => Ok(()),
        }
    }

    pub fn responses(&self) -> Vec<Content> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panicking handler must not poison the sink for the rest of the turn.
    fn lock(&self) -> MutexGuard<'_, Vec<Content>> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }
}
