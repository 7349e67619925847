//! Standalone runner for a single MQTT agent
//!
//! A subscriber prints one JSON line per notification to stdout. A publisher
//! reads JSON lines from stdin (an object or an array of objects per line)
//! and publishes each as one batch.

use clap::{Parser, Subcommand};
use mqtt_agents::agent::validation::ensure_valid;
use mqtt_agents::agent::{PublisherAgent, StdoutSink, SubscriberAgent, INPUT_ENDPOINT};
use mqtt_agents::config::{AgentFileConfig, AgentParameters, AgentRole, AgentSection, ConfigError};
use mqtt_agents::observability::{init_default_logging, init_logging, LogFormat};
use mqtt_agents::transport::EnvSecretDecryptor;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn, Level};

/// MQTT subscriber/publisher agent
#[derive(Parser)]
#[command(name = "mqtt-agents")]
#[command(about = "Bridge MQTT topics and structured records")]
#[command(version)]
struct Cli {
    /// Agent definition file
    #[arg(short, long, value_name = "FILE", default_value = "agent.toml")]
    config: PathBuf,

    /// Verbose logging (-v debug, -vv trace); overrides LOG_LEVEL
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run,
    /// Validate the agent definition
    Config {
        /// Print the resolved parameters
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    }

    info!("Starting mqtt-agents v{}", env!("CARGO_PKG_VERSION"));

    let (section, parameters) = match load_configuration(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(section, parameters).await,
        Commands::Config { show } => handle_config_command(&section, &parameters, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    path: &Path,
) -> Result<(AgentSection, AgentParameters), Box<dyn std::error::Error>> {
    info!("Loading configuration from: {}", path.display());
    let config = AgentFileConfig::load_from_file(path)?;
    let parameters = config.agent_parameters()?;
    Ok((config.agent, parameters))
}

fn handle_config_command(
    section: &AgentSection,
    parameters: &AgentParameters,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!(
            "[agent]\nid = {}\nrole = {:?}\nvariant = {:?}\n",
            section.id, section.role, section.variant
        );
        println!("[parameters]");
        for (key, value) in parameters.iter() {
            println!("{key} = {value:?}");
        }
    }

    match ensure_valid(section.role, section.variant, parameters) {
        Ok(()) => {
            info!("Configuration validation complete");
            Ok(())
        }
        Err(ConfigError::Validation(errors)) => {
            for problem in &errors {
                println!("{problem}");
            }
            Err(format!("{} configuration problem(s) found", errors.len()).into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_agent(
    section: AgentSection,
    parameters: AgentParameters,
) -> Result<(), Box<dyn std::error::Error>> {
    ensure_valid(section.role, section.variant, &parameters)?;

    let sink = Arc::new(StdoutSink);
    match section.role {
        AgentRole::Subscriber => {
            let agent = SubscriberAgent::create(
                section.id,
                section.variant,
                &parameters,
                &EnvSecretDecryptor,
                sink,
            )?;
            agent.start().await?;
            info!("Subscriber running, waiting for messages...");
            wait_for_shutdown().await?;
            agent.destroy().await?;
        }
        AgentRole::Publisher => {
            let agent = PublisherAgent::create(
                section.id,
                section.variant,
                &parameters,
                &EnvSecretDecryptor,
                sink,
            )?;
            agent.start().await?;
            info!("Publisher running, reading JSON lines from stdin...");
            tokio::select! {
                result = publish_stdin(&agent) => result?,
                result = wait_for_shutdown() => result?,
            }
            agent.destroy().await?;
        }
    }

    Ok(())
}

async fn publish_stdin(agent: &PublisherAgent) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let values = match serde_json::from_str::<Value>(&line) {
            Ok(Value::Array(values)) => values,
            Ok(value) => vec![value],
            Err(e) => {
                warn!(error = %e, "Skipping line that is not JSON");
                continue;
            }
        };
        if let Err(e) = agent.receive_values(INPUT_ENDPOINT, values).await {
            error!("Failed to publish batch: {}", e);
        }
    }
    info!("Input closed, shutting down");
    Ok(())
}

async fn wait_for_shutdown() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
    Ok(())
}
