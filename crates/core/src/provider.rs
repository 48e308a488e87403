//! Context provider trait: plugins that contribute to the per-turn State.
//!
//! Providers run in ascending `position` order. Each one sees the message
//! and whatever earlier providers already composed, so a later provider can
//! reuse work done by an earlier one.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::memory::MemoryStore;
use crate::message::Message;
use crate::state::{ProviderResult, State};

/// What a provider can see while it runs.
pub struct ProviderContext<'a> {
    pub message: &'a Message,
    /// State accumulated by providers that ran earlier in this composition.
    pub state: &'a State,
    pub store: &'a dyn MemoryStore,
    pub agent_name: &'a str,
}

/// The core context provider trait.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Unique name; also the key under `State.data.providers`.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Composition order, ascending. Ties keep registration order.
    fn position(&self) -> i32 {
        0
    }

    /// Dynamic providers are recomputed on every composition; static ones
    /// are computed at most once per turn.
    fn dynamic(&self) -> bool {
        false
    }

    /// Private providers only run when a composition names them explicitly.
    fn private(&self) -> bool {
        false
    }

    async fn get(&self, ctx: &ProviderContext<'_>) -> Result<ProviderResult, ProviderError>;
}
