//! Model client trait: the engine's boundary to text generation.
//!
//! The runtime feeds the composed prompt to `generate` and hands the reply
//! to the response decoder. Transport, auth and retries belong to the
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Which class of model a call targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    TextSmall,
    #[default]
    TextLarge,
    Embedding,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TextSmall => write!(f, "text_small"),
            Self::TextLarge => write!(f, "text_large"),
            Self::Embedding => write!(f, "embedding"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default)]
    pub kind: ModelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl GenerateOptions {
    pub fn small() -> Self {
        Self {
            kind: ModelKind::TextSmall,
            ..Default::default()
        }
    }

    pub fn large() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerateOptions)
        -> Result<String, ModelError>;

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::Unsupported(format!("{} has no embedding model", self.name())))
    }
}
