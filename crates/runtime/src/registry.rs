//! Name-keyed plugin catalogs.
//!
//! Registries are filled by [`AgentRuntimeBuilder`](crate::AgentRuntimeBuilder)
//! at startup and shared read-only across turns afterwards.

use cadence_core::error::{Error, ServiceError};
use cadence_core::{Action, ContextProvider, Evaluator, Service};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Normalise an action reference for matching: trimmed, case-folded,
/// with `-` and spaces read as `_`.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

// ── Providers ─────────────────────────────────────────────────────────────

/// Context providers, kept sorted by position.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ContextProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Ties in position keep registration order.
    pub fn register(&mut self, provider: Arc<dyn ContextProvider>) -> Result<(), Error> {
        if self.get(provider.name()).is_some() {
            return Err(Error::Registration(format!(
                "provider '{}' is already registered",
                provider.name()
            )));
        }
        let position = provider.position();
        let at = self
            .providers
            .partition_point(|p| p.position() <= position);
        debug!(provider = provider.name(), position, "Registered provider");
        self.providers.insert(at, provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ContextProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Providers in composition order.
    pub fn ordered(&self) -> impl Iterator<Item = &Arc<dyn ContextProvider>> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ── Actions ───────────────────────────────────────────────────────────────

/// Registered actions, resolvable by name or simile.
#[derive(Default)]
pub struct ActionRegistry {
    actions: Vec<Arc<dyn Action>>,
    /// Normalised name or simile → index into `actions`.
    index: HashMap<String, usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<(), Error> {
        let key = normalize_name(action.name());
        if let Some(&existing) = self.index.get(&key) {
            if normalize_name(self.actions[existing].name()) == key {
                return Err(Error::Registration(format!(
                    "action '{}' is already registered",
                    action.name()
                )));
            }
        }
        let slot = self.actions.len();
        // A real name always wins over another action's simile.
        self.index.insert(key, slot);
        for simile in action.similes() {
            let simile_key = normalize_name(simile);
            if self.index.contains_key(&simile_key) {
                warn!(
                    action = action.name(),
                    simile = %simile,
                    "Simile already claimed, ignoring"
                );
                continue;
            }
            self.index.insert(simile_key, slot);
        }
        debug!(action = action.name(), "Registered action");
        self.actions.push(action);
        Ok(())
    }

    /// Exact lookup by registered name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.iter().find(|a| a.name() == name)
    }

    /// Resolve a model-supplied reference by name or simile.
    pub fn resolve(&self, reference: &str) -> Option<&Arc<dyn Action>> {
        self.index
            .get(&normalize_name(reference))
            .map(|&i| &self.actions[i])
    }

    /// Actions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Action>> {
        self.actions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ── Evaluators ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct EvaluatorRegistry {
    evaluators: Vec<Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) -> Result<(), Error> {
        if self.get(evaluator.name()).is_some() {
            return Err(Error::Registration(format!(
                "evaluator '{}' is already registered",
                evaluator.name()
            )));
        }
        debug!(evaluator = evaluator.name(), "Registered evaluator");
        self.evaluators.push(evaluator);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Evaluator>> {
        self.evaluators.iter().find(|e| e.name() == name)
    }

    /// Evaluators in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Evaluator>> {
        self.evaluators.iter()
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

// ── Services ──────────────────────────────────────────────────────────────

/// Long-lived shared dependencies, looked up by service type.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Service>>,
    /// Registration order, for shutdown.
    order: Vec<String>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn Service>) -> Result<(), Error> {
        let name = service.service_type().to_string();
        if self.services.contains_key(&name) {
            return Err(Error::Registration(format!(
                "service '{name}' is already registered"
            )));
        }
        debug!(service = %name, "Registered service");
        self.order.push(name.clone());
        self.services.insert(name, service);
        Ok(())
    }

    pub fn get(&self, service_type: &str) -> Option<Arc<dyn Service>> {
        self.services.get(service_type).cloned()
    }

    /// Look up a service and downcast it to its concrete type.
    pub fn get_as<T: Service>(&self, service_type: &str) -> Option<&T> {
        self.services
            .get(service_type)?
            .as_any()
            .downcast_ref::<T>()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Stop every service in reverse registration order. Failures are
    /// logged and returned; they never stop the remaining services.
    pub async fn stop_all(&self) -> Vec<ServiceError> {
        let mut errors = Vec::new();
        for name in self.order.iter().rev() {
            let Some(service) = self.services.get(name) else {
                continue;
            };
            if let Err(e) = service.stop().await {
                warn!(service = %name, error = %e, "Service failed to stop");
                errors.push(e);
            }
        }
        errors
    }
}
