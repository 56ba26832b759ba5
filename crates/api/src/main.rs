//! Drowsiness Monitor - Main Entry Point
//!
//! Usage: `drowsiness-monitor [CONFIG]`. Without an argument the path comes
//! from `MONITOR_CONFIG`, falling back to `config/monitor.toml` if present.

use api::{init_logging, monitor, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MONITOR_CONFIG").ok());
    let config = AppConfig::load(path.as_deref())?;

    init_logging(&config.log)?;
    monitor::run(config).await
}
