//! Long-lived services registered with the runtime (API clients, schedulers,
//! connection pools). Plugins look them up by type name.

use async_trait::async_trait;
use std::any::Any;

use crate::error::ServiceError;

#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Registry key, e.g. "orders" or "browser".
    fn service_type(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Release resources. Called once when the runtime shuts down.
    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Downcasting hook for typed lookup.
    fn as_any(&self) -> &dyn Any;
}
