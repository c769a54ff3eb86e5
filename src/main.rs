//! Launcher: reads `SERVICE_MODE` and dispatches to the matching service.
//! All services share this binary and the same configuration surface.

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newswire::{config::AppConfig, service};

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,newswire=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();

    let mode = AppConfig::service_mode()?;
    let config = AppConfig::load()?;
    info!(version = newswire::VERSION, mode = mode.as_str(), "newswire starting");

    service::run(mode, config).await?;
    info!("newswire stopped");
    Ok(())
}
