//! State composition: runs context providers in position order and folds
//! their results into one [`State`].
//!
//! Each provider sees the message and everything composed before it. A
//! provider that errors, panics or times out is logged and contributes an
//! empty result; composition always continues.

use cadence_core::{ContextProvider, MemoryStore, Message, ProviderContext, ProviderResult, State};
use cadence_telemetry::{Span, SpanKind, TrajectoryRecorder};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::isolate::isolate;
use crate::registry::ProviderRegistry;

/// Which providers a composition runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProviderFilter {
    /// Every non-private provider.
    #[default]
    All,
    /// Exactly the named providers, private or not.
    Only(Vec<String>),
    /// Every non-private provider plus the named ones.
    Including(Vec<String>),
}

impl ProviderFilter {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(dedup(names))
    }

    pub fn including<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Including(dedup(names))
    }

    pub fn admits(&self, provider: &dyn ContextProvider) -> bool {
        match self {
            Self::All => !provider.private(),
            Self::Only(names) => names.iter().any(|n| n == provider.name()),
            Self::Including(names) => {
                !provider.private() || names.iter().any(|n| n == provider.name())
            }
        }
    }
}

fn dedup<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(Into::into)
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

/// Results of static providers, reused across compositions within one turn.
///
/// Dynamic providers are never stored. Failed calls are not stored either,
/// so a later composition in the same turn retries them.
#[derive(Debug, Default)]
pub struct ProviderCache {
    run_id: String,
    results: HashMap<String, ProviderResult>,
}

impl ProviderCache {
    /// A cache for the turn identified by `run_id`. Provider spans are
    /// recorded under that run.
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            results: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn get(&self, provider: &str) -> Option<&ProviderResult> {
        self.results.get(provider)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Builds the per-turn State from the registered providers.
pub struct StateComposer {
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn MemoryStore>,
    recorder: Arc<TrajectoryRecorder>,
    agent_name: String,
    timeout: Duration,
}

impl StateComposer {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn MemoryStore>,
        recorder: Arc<TrajectoryRecorder>,
        agent_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            providers,
            store,
            recorder,
            agent_name: agent_name.into(),
            timeout,
        }
    }

    /// Compose a fresh State for `message`.
    pub async fn compose_state(
        &self,
        message: &Message,
        filter: &ProviderFilter,
        cache: &mut ProviderCache,
    ) -> State {
        let mut state = State::new();
        self.compose_into(&mut state, message, filter, cache).await;
        state
    }

    /// Run the admitted providers and merge their results into `state`.
    pub async fn compose_into(
        &self,
        state: &mut State,
        message: &Message,
        filter: &ProviderFilter,
        cache: &mut ProviderCache,
    ) {
        let admitted: Vec<&Arc<dyn ContextProvider>> = self
            .providers
            .ordered()
            .filter(|p| filter.admits(p.as_ref()))
            .collect();

        debug!(
            message_id = %message.id,
            providers = admitted.len(),
            "Composing state"
        );

        for provider in admitted {
            let name = provider.name();

            if !provider.dynamic() {
                if let Some(hit) = cache.results.get(name) {
                    debug!(provider = name, "Provider result reused from turn cache");
                    state.merge_provider(name, hit.clone());
                    continue;
                }
            }

            let result = self.run_provider(provider.as_ref(), state, message, cache.run_id()).await;
            match result {
                Some(result) => {
                    if !provider.dynamic() {
                        cache.results.insert(name.to_string(), result.clone());
                    }
                    state.merge_provider(name, result);
                }
                None => state.merge_provider(name, ProviderResult::empty()),
            }
        }
    }

    async fn run_provider(
        &self,
        provider: &dyn ContextProvider,
        state: &State,
        message: &Message,
        run_id: &str,
    ) -> Option<ProviderResult> {
        let ctx = ProviderContext {
            message,
            state,
            store: self.store.as_ref(),
            agent_name: &self.agent_name,
        };
        let start = Instant::now();
        let mut span = Span::new(SpanKind::Provider, provider.name());
        let outcome = isolate(self.timeout, provider.get(&ctx)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(result) => {
                debug!(provider = provider.name(), elapsed_ms, "Provider finished");
                span.end(true);
                Some(result)
            }
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    error = %e,
                    elapsed_ms,
                    "Provider failed, substituting empty result"
                );
                span.fail(e.to_string());
                None
            }
        };
        self.recorder.record_span(run_id, span);
        result
    }
}

/// Render a prompt template against a composed State.
///
/// `{{providers}}` expands to the composed narrative and every key in
/// `state.values` is available by name. Unknown keys render empty.
pub fn render_prompt(template: &str, state: &State) -> Result<String, minijinja::Error> {
    let mut ctx = serde_json::Map::new();
    for (key, value) in &state.values {
        ctx.insert(key.clone(), value.to_json());
    }
    ctx.insert(
        "providers".to_string(),
        serde_json::Value::String(state.text.clone()),
    );

    let mut env = minijinja::Environment::new();
    env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);
    env.render_str(template, serde_json::Value::Object(ctx))
}
