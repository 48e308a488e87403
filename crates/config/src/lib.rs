//! Configuration loading, validation, and management for Cadence.
//!
//! Loads configuration from `~/.cadence/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.cadence/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name of the agent, exposed to prompts as `{{agentName}}`
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Sent when a turn produces no usable output
    #[serde(default = "default_fallback_response")]
    pub fallback_response: String,

    /// Name of the built-in action used when a plan resolves no actions
    #[serde(default = "default_reply_action")]
    pub reply_action: String,

    /// Template rendered into the model prompt for each turn
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,

    /// Per-invocation time limits
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// State composition settings
    #[serde(default)]
    pub composer: ComposerConfig,

    /// Event dispatcher settings
    #[serde(default)]
    pub events: EventConfig,

    /// Trajectory span recording
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Log output settings (applied by the CLI)
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_agent_name() -> String {
    "Cadence".into()
}
fn default_fallback_response() -> String {
    "Sorry, I ran into a problem handling that. Please try again.".into()
}
fn default_reply_action() -> String {
    "REPLY".into()
}
fn default_prompt_template() -> String {
    r#"{{providers}}

# Latest message
{{senderName}}: {{messageText}}

# Task: decide how {{agentName}} responds to the latest message.
Answer in this format:
<response>
  <thought>your reasoning</thought>
  <actions>ACTION_ONE,ACTION_TWO</actions>
  <text>what {{agentName}} says</text>
</response>"#
        .into()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_provider_ms")]
    pub provider_ms: u64,

    #[serde(default = "default_action_ms")]
    pub action_ms: u64,

    #[serde(default = "default_evaluator_ms")]
    pub evaluator_ms: u64,

    #[serde(default = "default_model_ms")]
    pub model_ms: u64,

    /// Limit for one event handler invocation
    #[serde(default = "default_event_handler_ms")]
    pub event_handler_ms: u64,
}

fn default_provider_ms() -> u64 {
    5_000
}
fn default_action_ms() -> u64 {
    30_000
}
fn default_evaluator_ms() -> u64 {
    15_000
}
fn default_model_ms() -> u64 {
    60_000
}
fn default_event_handler_ms() -> u64 {
    5_000
}

impl TimeoutConfig {
    pub fn provider(&self) -> Duration {
        Duration::from_millis(self.provider_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn evaluator(&self) -> Duration {
        Duration::from_millis(self.evaluator_ms)
    }

    pub fn model(&self) -> Duration {
        Duration::from_millis(self.model_ms)
    }

    pub fn event_handler(&self) -> Duration {
        Duration::from_millis(self.event_handler_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_ms: default_provider_ms(),
            action_ms: default_action_ms(),
            evaluator_ms: default_evaluator_ms(),
            model_ms: default_model_ms(),
            event_handler_ms: default_event_handler_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerConfig {
    /// How many prior messages the recent-messages provider loads
    #[serde(default = "default_recent_message_limit")]
    pub recent_message_limit: usize,
}

fn default_recent_message_limit() -> usize {
    20
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            recent_message_limit: default_recent_message_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Bound of the delivery queue between `emit` and the handler worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the broadcast tap for raw observers
    #[serde(default = "default_tap_capacity")]
    pub tap_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_tap_capacity() -> usize {
    256
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            tap_capacity: default_tap_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether trajectory spans are recorded
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Oldest spans are evicted beyond this many
    #[serde(default = "default_max_spans")]
    pub max_spans: usize,
}

fn default_max_spans() -> usize {
    10_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_spans: default_max_spans(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            fallback_response: default_fallback_response(),
            reply_action: default_reply_action(),
            prompt_template: default_prompt_template(),
            timeouts: TimeoutConfig::default(),
            composer: ComposerConfig::default(),
            events: EventConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.cadence/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CADENCE_AGENT_NAME`
    /// - `CADENCE_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("CADENCE_AGENT_NAME") {
            self.agent_name = name;
        }
        if let Ok(level) = std::env::var("CADENCE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cadence")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timeouts;
        if t.provider_ms == 0
            || t.action_ms == 0
            || t.evaluator_ms == 0
            || t.model_ms == 0
            || t.event_handler_ms == 0
        {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".into(),
            ));
        }

        if self.events.queue_capacity == 0 || self.events.tap_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "event queue and tap capacities must be greater than zero".into(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be \"pretty\" or \"json\", got \"{}\"",
                self.logging.format
            )));
        }

        if self.reply_action.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "reply_action must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `cadence config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
