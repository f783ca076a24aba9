//! Ephemerisd: autonomous NOAA weather satellite capture daemon.
//!
//! Loads configuration, starts the HTTP/WebSocket control plane, and runs
//! the predict-wait-capture scheduler. Shuts down gracefully on SIGINT or
//! SIGTERM.

mod app;
mod capture;
mod config;
mod events;
mod predict;
mod scheduler;
mod status;
mod web;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use config::Config;

#[derive(Parser)]
#[command(name = "ephemerisd")]
#[command(about = "NOAA weather satellite ground station daemon")]
struct Cli {
    /// Path to config TOML (auto-discovers if omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP bind address from the config
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Resolve config: explicit flag, then the discovery chain, then defaults.
    let config_path = cli.config.or_else(config::find_config_file);
    let cfg = match &config_path {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("config load failed: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&cfg.logging.level),
    )
    .format_timestamp_micros()
    .init();

    match &config_path {
        Some(path) => log::info!("loaded config from {}", path.display()),
        None => {
            log::info!("no config file found, using defaults");
            log::info!(
                "create {}/config.toml to customize",
                config::default_config_dir().display()
            );
        }
    }

    if let Err(e) = std::fs::create_dir_all(config::default_config_dir()) {
        log::error!("create config dir: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = cfg.ensure_dirs() {
        log::error!("directory setup: {e}");
        return ExitCode::FAILURE;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let _ = tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    match app::run(cfg, config_path, cli.bind, shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("ephemerisd failed: {e}");
            ExitCode::FAILURE
        }
    }
}
