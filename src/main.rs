// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pushpin - control-surface front-end for OSC synth engines.
//!
//! Starts the configured synth engines, maps surface encoders and buttons to
//! their OSC parameters, and routes audio between them through PipeWire.

mod app;
mod audio;
mod clip_menu;
mod config;
mod controls;
mod devices;
mod engine;
mod layout;
mod osc;
mod surface;

use app::{App, Source};
use clap::Parser;
use config::ConfigManager;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pushpin", version, about)]
struct Cli {
    /// Directory holding settings.toml.
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Folder with instrument definition JSON files.
    #[arg(long)]
    instruments_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("pushpin=debug".parse()?))
        .init();

    let cli = Cli::parse();
    info!("Starting Pushpin");

    let config_manager = match &cli.config_dir {
        Some(dir) => ConfigManager::with_dir(dir)?,
        None => ConfigManager::new()?,
    };
    let config = config_manager.load_config()?;

    let instruments_dir = cli
        .instruments_dir
        .clone()
        .or_else(|| config.instruments.definition_folder.clone())
        .unwrap_or_else(|| config_manager.default_instruments_dir());
    let definitions =
        config_manager.load_instruments(&instruments_dir, &config.instruments.enabled)?;
    info!(
        "Loaded {} instrument definition(s) from {:?}",
        definitions.len(),
        instruments_dir
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let surface_socket = osc::bind(config.surface.osc_port).await?;
    tokio::spawn(osc::listen(surface_socket, Source::Surface, tx.clone()));

    let refresh_interval = config.pipewire.refresh_interval();
    let (task_tx, mut task_rx) = mpsc::unbounded_channel();
    let mut app = App::new(config, definitions, task_tx)?;
    if let Err(e) = app.startup(&tx).await {
        error!("Startup failed: {}", e);
        app.shutdown();
        return Err(e.into());
    }

    let mut refresh = refresh_interval.map(tokio::time::interval);
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("Pushpin ready");
    loop {
        tokio::select! {
            Some(inbound) = rx.recv() => {
                app.handle_inbound(inbound).await;
            }
            Some(task) = task_rx.recv() => {
                app.handle_task(task);
            }
            _ = async {
                match refresh.as_mut() {
                    Some(interval) => interval.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = app.refresh().await {
                    error!("Topology refresh failed: {}", e);
                }
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
        }
    }

    app.shutdown();
    info!("Pushpin stopped");
    Ok(())
}
