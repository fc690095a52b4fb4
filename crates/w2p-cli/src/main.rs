//! W2P CLI - relay server-sent events to Google Cloud Pub/Sub.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use w2p_core::config::LogFormat;
use w2p_core::Config;

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution or graceful shutdown
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Event stream error (unauthorized, reconnects exhausted, malformed feed)
    SourceError = 2,
    /// Pub/Sub error (credentials, permissions, missing topic)
    SinkError = 3,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(err) = error.downcast_ref::<w2p_core::Error>() {
            return match err {
                w2p_core::Error::Config(_)
                | w2p_core::Error::Io(_)
                | w2p_core::Error::Serialization(_) => ExitCode::ConfigError,
                w2p_core::Error::Source(_) => ExitCode::SourceError,
                w2p_core::Error::Sink(_) => ExitCode::SinkError,
                w2p_core::Error::Shutdown => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "w2p")]
#[command(about = "Relay a server-sent event stream to Google Cloud Pub/Sub", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until interrupted
    Run {
        #[command(flatten)]
        overrides: commands::run::Overrides,
    },

    /// Show status and health of a running relay
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL (defaults to the health URL on the metrics port)
        #[arg(long)]
        metrics_url: Option<String>,
    },

    /// Validate configuration
    Validate {
        #[command(flatten)]
        overrides: commands::run::Overrides,
    },
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Try to load config for log format settings (optional - falls back to JSON)
    let log_format = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring.log_format)
        .unwrap_or(LogFormat::Json);

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { overrides } => {
            let mut config = load_config(cli.config.as_deref())?;
            overrides.apply(&mut config);
            commands::run::run(config).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, metrics_url.as_deref()).await?;
        }

        Commands::Validate { overrides } => {
            let mut config = load_config(cli.config.as_deref())?;
            overrides.apply(&mut config);
            config.validate()?;
            println!("Configuration is valid");
            println!("  source: {}", config.source.url);
            println!("  topic:  {}", config.sink.topic_path());
            match &config.sink.emulator_host {
                Some(host) => println!("  auth:   none (emulator at {})", host),
                None => println!("  auth:   service account key"),
            }
        }
    }

    Ok(())
}

/// Load the config file if one was given or `config.toml` exists; defaults otherwise.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from("config.toml");
            if !default.exists() {
                return Ok(Config::default());
            }
            default
        }
    };

    Config::from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
