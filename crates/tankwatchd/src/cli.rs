//! Command-line entry point for the `tankwatchd` binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve game state on ws://localhost:8765
//! tankwatchd
//!
//! # Serve on all interfaces, twice a second
//! tankwatchd --host 0.0.0.0 --interval-ms 500 run
//!
//! # Read the game once and print it
//! tankwatchd snapshot
//!
//! # Show the configuration that would be used
//! tankwatchd --config ./tankwatch.toml check-config
//!
//! # Enable debug logging
//! RUST_LOG=tankwatchd=debug tankwatchd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown (the emulator is unhooked first)

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tankwatch_core::GameState;

use crate::config::Config;
use crate::dolphin::DolphinSource;
use crate::monitor::{HookPolicy, SourceMonitor};
use crate::service::StateService;

/// Tankwatch daemon - streams Wii Play Tanks state over WebSocket
#[derive(Parser, Debug)]
#[command(name = "tankwatchd", version, about)]
pub struct Args {
    /// Configuration file (default: $TANKWATCH_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override server.host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Override server.port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Override poll.interval_ms
    #[arg(long, global = true)]
    pub interval_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the state server (default)
    Run,
    /// Hook the emulator once and print the game state
    Snapshot,
    /// Validate the configuration and print it
    CheckConfig,
}

impl Args {
    /// Builds the effective configuration: defaults, then file, then flags.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = match Config::locate(self.config.as_deref()) {
            Some(path) => load_config(&path)?,
            None => Config::default(),
        };

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.poll.interval_ms = interval_ms;
        }

        config
            .validate()
            .context("Invalid configuration after command-line overrides")?;
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Parses arguments and runs the selected command.
pub fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Run);
    let config = args.resolve_config()?;

    match command {
        Command::Run => run_service(config),
        Command::Snapshot => snapshot(config),
        Command::CheckConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("tankwatchd=info".parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn run_service(config: Config) -> Result<()> {
    init_tracing()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        address = %config.server.bind_address(),
        "Tankwatch daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let source = DolphinSource::from_config(&config.hook);
    let service = StateService::new(config, source);

    if let Err(e) = service.run(cancel_token).await {
        error!(error = %e, "Service error");
        return Err(e.into());
    }

    info!("Tankwatch daemon stopped");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn snapshot(config: Config) -> Result<()> {
    init_tracing()?;

    let source = DolphinSource::from_config(&config.hook);
    let mut monitor = SourceMonitor::new(source, config.layout, HookPolicy::from(&config.hook));
    let state = monitor.refresh().await;
    monitor.cleanup();

    println!("{}", serde_json::to_string_pretty(&state)?);
    println!();
    print!("{}", summarize(&state));

    if let Some(message) = &state.error {
        anyhow::bail!("Snapshot failed: {message}");
    }
    Ok(())
}

/// Human-readable entity table for `snapshot`.
fn summarize(state: &GameState) -> String {
    if let Some(message) = &state.error {
        return format!("error: {message}\n");
    }

    let mut out = format!(
        "lives {}  level {}  player ({:.1}, {:.1})  entities {}/{}\n",
        state.lives,
        state.level_number,
        state.player.x,
        state.player.y,
        state.num_remaining_entities,
        state.num_starting_entities,
    );
    for (index, entity) in state.entities.iter().enumerate() {
        let color = entity
            .color()
            .map(|c| c.to_string())
            .unwrap_or_else(|| format!("code {}", entity.color_code));
        let status = if entity.alive { "alive" } else { "destroyed" };
        out.push_str(&format!(
            "  #{index:<2} {color:<10} ({:.1}, {:.1})  {status}\n",
            entity.x, entity.y
        ));
    }
    out
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
