//! The per-turn composed context.
//!
//! `State` is built fresh for every turn by the composer. Each provider
//! writes only to its own slot in `data.providers`; `values` is the flat
//! map used for prompt substitution and `text` the flattened narrative.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::action::{ActionPlan, ActionResult};
use crate::memory::{Entity, Room, World};
use crate::value::{Value, ValueMap};

/// Separator placed between provider text sections.
pub const SECTION_SEPARATOR: &str = "\n\n";

/// What a single provider contributes to the State.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub values: ValueMap,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub data: ValueMap,
}

impl ProviderResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.text.is_empty() && self.data.is_empty()
    }
}

/// Structured per-turn cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<Room>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<World>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
    /// Provider results keyed by provider name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_plan: Option<ActionPlan>,
    #[serde(default)]
    pub action_results: Vec<ActionResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub values: ValueMap,
    #[serde(default)]
    pub data: StateData,
    #[serde(default)]
    pub text: String,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one provider's result: values are last-write-wins, the result
    /// is stored under the provider's name, and non-empty text is appended
    /// as a new section.
    pub fn merge_provider(&mut self, name: &str, result: ProviderResult) {
        for (key, value) in &result.values {
            self.values.insert(key.clone(), value.clone());
        }
        let text = result.text.trim();
        if !text.is_empty() {
            if !self.text.is_empty() {
                self.text.push_str(SECTION_SEPARATOR);
            }
            self.text.push_str(text);
        }
        self.data.providers.insert(name.to_string(), result);
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderResult> {
        self.data.providers.get(name)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Names of the providers that contributed, in key order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.data.providers.keys().map(String::as_str).collect()
    }
}
