mod arbiter;
mod astro_math;
mod config;
mod geometry;
mod motor;
mod remote;
mod serial;
mod server;
mod state;

use arbiter::Arbiter;
use clap::Parser;
use config::Config;
use eyre::{Context, Result};
use remote::DomeHandle;
use state::DomeState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing_subscriber::EnvFilter;

/// Dome control core daemon: serial link to the shutter/azimuth motor
/// controller, command arbitration, and a minimal JSON remote surface.
#[derive(Debug, Parser)]
#[command(name = "domed")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "DOME_CONFIG", default_value = "dome.json")]
    config: PathBuf,
}

#[rocket::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_path(&cli.config)
        .wrap_err_with(|| format!("loading configuration from {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bind_address = config.bind_address;
    let config = Arc::new(config);

    let state = Arc::new(RwLock::new(DomeState::disconnected(chrono::Utc::now())));
    let movement_complete = Arc::new(Notify::new());

    let arbiter = Arbiter::new((*config).clone(), state.clone(), movement_complete.clone());
    let requests = arbiter.spawn();

    let dome = DomeHandle::new(config, requests, state, movement_complete);

    let figment = rocket::Config::figment()
        .merge(("address", bind_address.ip()))
        .merge(("port", bind_address.port()));

    server::build(figment, dome).launch().await.wrap_err("rocket server exited")?;

    Ok(())
}
