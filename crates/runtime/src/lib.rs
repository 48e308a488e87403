//! The per-message orchestration engine, the heart of Cadence.
//!
//! A turn follows a **Compose → Decide → Act → Evaluate** cycle:
//!
//! 1. **Receive** a message and persist it
//! 2. **Compose** State from the registered context providers
//! 3. **Decide** by asking the model, then decode its tagged reply
//! 4. **Plan** the named actions, resolving similes
//! 5. **Act** on each step in order, each under its own trajectory step
//! 6. **Evaluate** the closed plan with every applicable evaluator
//!
//! Plugin failures never escape a turn: they become failed steps, failed
//! evaluator results, or empty provider contributions. See
//! [`AgentRuntime::handle_message`].

pub mod builtin;
pub mod composer;
pub mod decoder;
pub mod dispatcher;
pub mod evaluators;
pub mod executor;
pub mod isolate;
pub mod planner;
pub mod registry;
pub mod runtime;
pub mod traced_model;

#[cfg(test)]
mod test_helpers;

pub use composer::{ProviderCache, ProviderFilter, StateComposer, render_prompt};
pub use decoder::{Mapping, Node, decode, encode};
pub use dispatcher::{EventDispatcher, EventHandler, handler_fn};
pub use evaluators::EvaluatorRunner;
pub use executor::{ActionExecutor, ExecutionContext};
pub use isolate::{Isolated, isolate};
pub use planner::build_plan;
pub use registry::{
    ActionRegistry, EvaluatorRegistry, ProviderRegistry, ServiceRegistry, normalize_name,
};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, TurnResult};
pub use traced_model::TracedModel;
