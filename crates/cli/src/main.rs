//! Cadence CLI: drive the turn engine from a terminal.
//!
//! Commands:
//! - `run`    : Handle one message end to end and print the turn
//! - `decode` : Decode a structured model reply to JSON
//! - `config` : Show, validate, or initialize configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "cadence",
    about = "Cadence: per-message agent orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.cadence/config.toml)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one turn for a message
    Run {
        /// The message text
        #[arg(short, long)]
        message: String,

        /// Use the contents of this file as the model's reply instead of echoing
        #[arg(short, long)]
        reply_file: Option<PathBuf>,

        /// Room the message arrives in
        #[arg(long, default_value = "cli")]
        room: String,

        /// Sender of the message
        #[arg(long, default_value = "user")]
        sender: String,

        /// Print the full turn as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode a tagged model reply (reads stdin when no file is given)
    Decode {
        file: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the default configuration file location
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref());

    // Initialize tracing
    let level = match (&config, cli.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(config), false) => config.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    let json = matches!(&config, Ok(c) if c.logging.format == "json");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Run {
            message,
            reply_file,
            room,
            sender,
            json,
        } => {
            let options = commands::run::RunOptions {
                message,
                reply_file,
                room,
                sender,
                json,
            };
            commands::run::run(config?, options).await?
        }
        Commands::Decode { file } => commands::decode::run(file.as_deref())?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config?)?,
            ConfigAction::Validate => commands::config_cmd::validate(config)?,
            ConfigAction::Path => commands::config_cmd::path(cli.config.as_deref()),
            ConfigAction::Init { force } => {
                commands::config_cmd::init(cli.config.as_deref(), force)?
            }
        },
    }

    Ok(())
}
