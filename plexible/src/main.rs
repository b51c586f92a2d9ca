//! Point d'entrée du lecteur de démonstration.

mod cli;
mod config;
mod player;

use clap::Parser;
use plxdevice::Device;
use plxproto::{Capability, PlayerType};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    let level: LevelFilter = match args.log_level.parse() {
        Ok(level) => level,
        Err(_) => {
            eprintln!("Invalid log level: {}", args.log_level);
            std::process::exit(1);
        }
    };

    let subscriber = Registry::default().with(
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(level),
    );
    tracing::subscriber::set_global_default(subscriber).expect("failed to install tracing subscriber");

    let config = match config::Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("error loading configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("🎵 starting player {}", config.device.name);
    let device = Device::new(config.device_info());

    let (timelines, commands) = player::spawn();
    if let Err(e) = device.add_player(
        PlayerType::Music,
        vec![Capability::Timeline, Capability::Playback],
        timelines,
        commands,
    ) {
        error!("error adding player: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = device.start().await {
        error!("error starting device: {}", e);
        std::process::exit(1);
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down"),
        Err(e) => error!("error waiting for shutdown signal: {}", e),
    }
    device.stop().await;
}
