//! CLI entry point for roomcast

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input};
use roomcast_client::{RequestClient, StateEventParams};
use roomcast_core::bus::{BusPtr, InMemoryBus};
use roomcast_core::config::validate::{is_user_id, validate_config};
use roomcast_core::config::{Config, ConfigLoader};
use roomcast_core::logging::{init_logging, WorkerGuard};
use roomcast_dispatch::{DispatchService, LoopbackProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span};

#[derive(Parser)]
#[command(name = "roomcast")]
#[command(about = "Correlated room message delivery over an in-process bus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an initial configuration
    Onboard {
        /// Accept defaults without prompting
        #[arg(short, long)]
        yes: bool,
        /// Default delivery identity (@localpart:server)
        #[arg(long)]
        identity: Option<String>,
        /// Turn on end-to-end encryption
        #[arg(long)]
        encryption: bool,
    },
    /// Show the effective configuration
    Status,
    /// Deliver a text message through the loopback dispatcher
    Send {
        /// Target room id
        room: String,
        /// Message body
        text: String,
        /// Send as a notice instead of a text message
        #[arg(long)]
        notice: bool,
        /// Identity to send as
        #[arg(long = "as")]
        sender: Option<String>,
    },
    /// Set a state event through the loopback dispatcher
    State {
        /// Target room id
        room: String,
        /// State event type, e.g. m.room.topic
        event_type: String,
        /// State key
        #[arg(short, long, default_value = "")]
        state_key: String,
        /// Event content as JSON
        #[arg(long, default_value = "{}")]
        content: String,
        /// Identity to send as
        #[arg(long = "as")]
        sender: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new(),
    };

    match cli.command {
        Commands::Onboard {
            yes,
            identity,
            encryption,
        } => run_onboard(&loader, yes, identity, encryption),
        Commands::Status => run_status(&loader),
        Commands::Send {
            room,
            text,
            notice,
            sender,
        } => {
            let subtype = if notice { "notice" } else { "text" };
            let (config, _guard) = load_with_logging(&loader)?;
            run_delivery(&config, |client| async move {
                client
                    .send_text(&room, &text, subtype, sender.as_deref())
                    .await
            })
            .await
        }
        Commands::State {
            room,
            event_type,
            state_key,
            content,
            sender,
        } => {
            let content: serde_json::Value =
                serde_json::from_str(&content).context("--content must be valid JSON")?;
            let params = StateEventParams::new(room, event_type, content)
                .with_state_key(state_key)
                .with_sender(sender);
            let (config, _guard) = load_with_logging(&loader)?;
            run_delivery(&config, |client| async move {
                client.send_state_event(params).await
            })
            .await
        }
    }
}

/// Load the config and install logging. Relative log directories live under
/// the config directory.
fn load_with_logging(loader: &ConfigLoader) -> Result<(Config, WorkerGuard)> {
    let mut config = loader.load()?;
    if Path::new(&config.logging.dir).is_relative() {
        config.logging.dir = loader
            .config_dir()
            .join(&config.logging.dir)
            .to_string_lossy()
            .into_owned();
    }
    std::fs::create_dir_all(&config.logging.dir)
        .with_context(|| format!("creating log directory {}", config.logging.dir))?;
    let guard = init_logging(&config.logging);
    Ok((config, guard))
}

fn run_onboard(
    loader: &ConfigLoader,
    yes: bool,
    identity: Option<String>,
    encryption: bool,
) -> Result<()> {
    println!("{}", style("Welcome to roomcast!").bold().cyan());

    let config_path = loader.config_path();
    if config_path.exists() && !yes {
        let overwrite = Confirm::new()
            .with_prompt("Configuration already exists. Overwrite?")
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Onboard cancelled.");
            return Ok(());
        }
    }

    let mut config = Config::default();
    config.identity.default_identity = match identity {
        Some(identity) => identity,
        None if yes => config.identity.default_identity.clone(),
        None => Input::<String>::new()
            .with_prompt("Default delivery identity")
            .default(config.identity.default_identity.clone())
            .validate_with(|input: &String| {
                if is_user_id(input) {
                    Ok(())
                } else {
                    Err("expected @localpart:server")
                }
            })
            .interact_text()?,
    };
    config.encryption.enabled = if encryption || yes {
        encryption
    } else {
        Confirm::new()
            .with_prompt("Enable end-to-end encryption?")
            .default(false)
            .interact()?
    };

    validate_config(&config)?;
    loader.save(&config)?;

    println!(
        "{} Configuration written to {}",
        style("✓").green(),
        config_path.display()
    );
    Ok(())
}

fn run_status(loader: &ConfigLoader) -> Result<()> {
    println!("{}", style("roomcast status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    let config_path = loader.config_path();
    let source = if config_path.exists() {
        style("found").green()
    } else {
        style("missing, using defaults").yellow()
    };
    println!("{}", style("Configuration:").bold());
    println!("  Config file: {} ({})", config_path.display(), source);

    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            println!("  {} {}", style("invalid:").red(), e);
            return Ok(());
        }
    };
    println!();

    println!("{}", style("Bus:").bold());
    println!("  Component: {}", config.bus.component_name);
    println!("  Channel capacity: {}", config.bus.channel_capacity);
    match config.bus.request_timeout() {
        Some(timeout) => println!("  Request timeout: {}s", timeout.as_secs()),
        None => println!("  Request timeout: none"),
    }
    println!();

    println!("{}", style("Identity:").bold());
    println!("  Default: {}", config.identity.default_identity);
    if let Some(name) = &config.identity.default_display_name {
        println!("  Display name: {}", name);
    }
    println!();

    println!("{}", style("Encryption:").bold());
    let enabled = if config.encryption.enabled {
        style("enabled").green()
    } else {
        style("disabled").dim()
    };
    println!("  Status: {}", enabled);
    let notices = match config.encryption.encrypt_notices {
        Some(false) => "cleartext",
        _ => "encrypted",
    };
    println!("  Notices: {}", notices);
    println!();

    println!("{}", style("Logging:").bold());
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);
    println!("  Directory: {}", config.logging.dir);

    Ok(())
}

/// Run a dispatcher backed by loopback intents, make one request through
/// a [`RequestClient`] and print the outcome and the intent journal.
async fn run_delivery<F, Fut>(config: &Config, request: F) -> Result<()>
where
    F: FnOnce(RequestClient) -> Fut,
    Fut: std::future::Future<Output = roomcast_core::Result<String>>,
{
    let bus: BusPtr = Arc::new(InMemoryBus::with_capacity(config.bus.channel_capacity));
    let provider = LoopbackProvider::new();

    let service = DispatchService::new(bus.clone(), Arc::new(provider.clone()), config)
        .with_span(info_span!("dispatcher"));
    let handle = Arc::new(service).start().await?;

    let client = RequestClient::new(bus, config)
        .await?
        .with_span(info_span!("client"));
    let outcome = request(client).await;
    handle.shutdown().await;

    println!("{}", style("Intent journal:").bold());
    for call in provider.journal() {
        println!("  {}", serde_json::to_string(&call)?);
    }

    match outcome {
        Ok(event_id) => {
            info!(event_id = %event_id, "Delivered");
            println!("{} Event id: {}", style("✓").green(), event_id);
            Ok(())
        }
        Err(e) => {
            println!("{} {}", style("✗").red(), e);
            Err(e.into())
        }
    }
}
