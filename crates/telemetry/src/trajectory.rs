//! Ambient trajectory step binding.
//!
//! The executor binds a fresh step id around each action handler. Code
//! anywhere below it (a model call inside a helper inside the handler) can
//! read the id with [`current_step`] without it being passed down.
//!
//! The binding is task-local: each turn's future chain sees only its own
//! value, and the previous value is restored when the scope's future
//! completes, errors, or is dropped mid-flight.

use serde::{Deserialize, Serialize};
use std::future::Future;
use uuid::Uuid;

/// Opaque correlation token for one step's execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrajectoryStepId(String);

impl TrajectoryStepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TrajectoryStepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrajectoryStepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TrajectoryStepId> for String {
    fn from(id: TrajectoryStepId) -> Self {
        id.0
    }
}

tokio::task_local! {
    static CURRENT_STEP: TrajectoryStepId;
}

/// Run `fut` with `step` bound as the current trajectory step.
pub async fn with_step<F>(step: TrajectoryStepId, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_STEP.scope(step, fut).await
}

/// The step bound by the innermost enclosing [`with_step`], if any.
pub fn current_step() -> Option<TrajectoryStepId> {
    CURRENT_STEP.try_with(|step| step.clone()).ok()
}
