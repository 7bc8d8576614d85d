//! Aardium: thin configurable desktop-shell launcher
//!
//! Default mode opens a window on the configured URL through the host
//! runtime and runs the launcher loop. `--server` skips the window and
//! runs the offscreen frame server on the loopback interface instead.

mod bridge;
mod cli;
mod config;
mod launcher;
mod options;
mod registry;
mod runtime;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aardium_offscreen::{FrameServer, SoftwareSurfaceFactory};
use cli::Cli;
use config::Config;
use launcher::Launcher;
use options::WindowOptions;
use runtime::HeadlessRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("aardium=debug,info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse_args();
    let config = Config::load()?;

    match cli.server {
        Some(port) => {
            let port = port.unwrap_or(config.server.port);
            info!("Starting offscreen render server on port {}", port);
            let server = FrameServer::bind(port, Arc::new(SoftwareSurfaceFactory))
                .await?
                .with_frame_rate(config.server.frame_rate);
            server.run().await
        }
        None => {
            let options = WindowOptions::from_cli(&cli, &config)?;
            info!("Starting launcher for {}", options.url);
            let mut runtime = HeadlessRuntime::new();
            Launcher::new(options).run(&mut runtime).await
        }
    }
}
