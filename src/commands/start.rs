use anyhow::Result;
use colored::Colorize;
use logql_gateway::{config, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// Loads configuration and runs the server until a shutdown signal arrives
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Starting LogQL gateway...".green());

    let cfg = config::load_config_from(config_path)?;
    info!(config = %config_path.display(), "Configuration loaded");

    // Blocks until shutdown
    server::start_server(cfg).await?;

    Ok(())
}
