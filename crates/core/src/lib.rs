//! # Cadence Core
//!
//! Domain types, capability traits, and error definitions for the Cadence
//! turn orchestration engine. This crate carries no runtime logic; it
//! defines the model that the runtime and every plugin implement against.
//!
//! ## Design Philosophy
//!
//! Every plugin role is a trait here, resolved by name through explicit
//! registries in the runtime:
//! - `ContextProvider` contributes to the per-turn `State`
//! - `Action` performs a side effect and/or produces response text
//! - `Evaluator` scores the turn after its plan closes
//! - `Service` is a long-lived shared dependency
//!
//! External collaborators (`ModelClient`, `MemoryStore`, `OutboundSink`)
//! are traits too, so the runtime can be driven by test doubles.

pub mod action;
pub mod channel;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod memory;
pub mod message;
pub mod model;
pub mod provider;
pub mod service;
pub mod state;
pub mod value;

// Re-export key types at crate root for ergonomics
pub use action::{
    Action, ActionContext, ActionExample, ActionPlan, ActionPlanStep, ActionResult, StepStatus,
    TurnOutcome,
};
pub use channel::{OutboundSink, ResponseSink};
pub use error::{Error, Result};
pub use evaluator::{Evaluator, EvaluatorContext, EvaluatorResult};
pub use event::{Event, EventPayload, EventType, PayloadKind};
pub use memory::{EmbeddingEntry, Entity, MemoryStore, Room, TurnRecord, World};
pub use message::{Attachment, Content, Message};
pub use model::{GenerateOptions, ModelClient, ModelKind};
pub use provider::{ContextProvider, ProviderContext};
pub use service::Service;
pub use state::{ProviderResult, State, StateData};
pub use value::{Value, ValueMap};
