//! Sensor telemetry relay - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Real-time athlete sensor telemetry relay
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PULSE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Determine config path: CLI arg > PULSE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PULSE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = pulse_relay::AppConfig::from_file(&config_path)?;

    // Logging filter comes from the config, so it is loaded first
    pulse_telemetry::init_logging(&config.telemetry.log_filter)?;

    info!("Starting pulse-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        addr = %config.server.listen_addr(),
        "Configuration loaded"
    );

    let app = pulse_relay::Application::new(config)?;
    app.run().await?;

    Ok(())
}
