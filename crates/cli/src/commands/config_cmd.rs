//! `cadence config`: Configuration management commands.

use cadence_config::{ConfigError, EngineConfig};
use std::path::Path;

use super::config_path;

pub fn validate(config: Result<EngineConfig, ConfigError>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed and validated");

    let mut warnings = Vec::new();
    if !config.prompt_template.contains("{{providers}}") {
        warnings.push("Prompt template does not include {{providers}}; composed context is unused");
    }
    if config.composer.recent_message_limit == 0 {
        warnings.push("recent_message_limit is 0; the model will see no conversation history");
    }
    if !config.telemetry.enabled {
        warnings.push("Telemetry disabled; trajectory spans will not be recorded");
    }
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Agent:        {}", config.agent_name);
    println!("   Reply action: {}", config.reply_action);
    println!(
        "   Timeouts:     provider {}ms, action {}ms, evaluator {}ms, model {}ms",
        config.timeouts.provider_ms,
        config.timeouts.action_ms,
        config.timeouts.evaluator_ms,
        config.timeouts.model_ms
    );
    println!("   Event queue:  {}", config.events.queue_capacity);
    Ok(())
}

pub fn show(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(explicit: Option<&Path>) {
    println!("{}", config_path(explicit).display());
}

pub fn init(explicit: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path(explicit);
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, EngineConfig::default_toml())?;
    println!("Wrote {}", path.display());
    Ok(())
}
