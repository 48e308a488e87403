//! Error types for the Cadence domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each plugin role has its own error enum; the turn pipeline captures most
//! of them as data (step errors, evaluator results) instead of propagating.

use thiserror::Error;

/// The top-level error type for Cadence operations that cross component
/// boundaries.
#[derive(Debug, Error)]
pub enum Error {
    // --- Context provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Action errors ---
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    // --- Evaluator errors ---
    #[error("Evaluator error: {0}")]
    Evaluator(#[from] EvaluatorError),

    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Event errors ---
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    // --- Service errors ---
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    // --- Registration errors ---
    #[error("Registration error: {0}")]
    Registration(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Resource-exhaustion class errors abort a turn outright. Everything
    /// else is captured as data and the turn keeps going.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Store(StoreError::Unavailable(_)))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Per-role errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider '{provider}' failed: {reason}")]
    Failed { provider: String, reason: String },

    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Provider dependency unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Action not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),

    #[error("Action '{action}' timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("Invalid action input: {0}")]
    InvalidInput(String),

    #[error("Response delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, Error)]
pub enum EvaluatorError {
    #[error("{0}")]
    Failed(String),

    #[error("Evaluator '{evaluator}' timed out after {timeout_ms}ms")]
    Timeout { evaluator: String, timeout_ms: u64 },
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    RequestFailed(String),

    #[error("Model timed out after {0}ms")]
    Timeout(u64),

    #[error("Model operation not supported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Error)]
pub enum EventError {
    #[error("Payload '{payload}' does not belong to event type {event_type}")]
    PayloadMismatch { event_type: String, payload: String },

    #[error("Event dispatcher closed")]
    Closed,

    #[error("Event queue is full")]
    QueueFull,

    #[error("Event handler failed: {0}")]
    HandlerFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Service '{0}' failed to stop: {1}")]
    StopFailed(String, String),

    #[error("Service not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Delivery to room {room_id} failed: {reason}")]
    Failed { room_id: String, reason: String },
}
