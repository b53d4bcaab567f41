#![allow(missing_docs)]

//! Sensord daemon entry point.
//!
//! Wires the authority client, authorization gate, device registry, and
//! manager together, then serves the IPC socket until a shutdown signal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use sensord::authority::{Authority, AuthorizationGate, SocketAuthority};
use sensord::config::SensordConfig;
use sensord::device::{DeviceFactory, LoopbackFactory};
use sensord::ipc::IpcServer;
use sensord::logging;
use sensord::manager::Manager;
use sensord::registry::DeviceRegistry;

/// Sensord — privileged registry of IPC-exposed sensor devices.
#[derive(Parser)]
#[command(name = "sensord", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the sensord daemon.
    Start,
    /// Load configuration, print the effective values, and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start => handle_start().await,
        Command::CheckConfig => handle_check_config(),
    }
}

/// Run the daemon: bind the IPC socket and serve until SIGINT.
async fn handle_start() -> Result<()> {
    let config = SensordConfig::load().context("failed to load configuration")?;
    let _logging_guard = logging::init_daemon(
        Path::new(&config.daemon.logs_dir),
        &config.daemon.log_level,
    )?;

    info!(version = env!("CARGO_PKG_VERSION"), "sensord starting");

    let authority: Arc<dyn Authority> = Arc::new(SocketAuthority::new(
        PathBuf::from(&config.authority.socket_path),
        config.authority.timeout(),
    ));
    let gate = AuthorizationGate::new(authority);

    let factory: Arc<dyn DeviceFactory> = Arc::new(LoopbackFactory);
    let registry = DeviceRegistry::new(factory);

    let manager = Arc::new(Manager::new(
        registry,
        gate,
        config.authority.register_action.clone(),
    ));

    let socket_path = PathBuf::from(&config.daemon.socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create socket directory {}", parent.display()))?;
    }

    let server = IpcServer::new(manager);
    tokio::select! {
        result = server.serve(&socket_path) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, shutting down");
            Ok(())
        }
    }
}

/// Validate configuration and print the effective values.
fn handle_check_config() -> Result<()> {
    logging::init_cli();
    let config = SensordConfig::load().context("failed to load configuration")?;

    println!("daemon.socket_path      = {}", config.daemon.socket_path);
    println!("daemon.log_level        = {}", config.daemon.log_level);
    println!("daemon.logs_dir         = {}", config.daemon.logs_dir);
    println!("authority.socket_path   = {}", config.authority.socket_path);
    println!("authority.timeout_secs  = {}", config.authority.timeout_secs);
    println!(
        "authority.register_action = {}",
        config.authority.register_action
    );
    Ok(())
}
