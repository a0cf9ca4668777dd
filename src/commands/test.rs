use anyhow::Result;
use colored::Colorize;
use logql_gateway::config::{self, TranslationMode};
use std::path::Path;
use tracing::info;

/// Execute the test command
///
/// This validates the configuration file without starting the server
pub fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Testing configuration...".yellow());
    info!("Loading and validating configuration");

    // Load configuration (this will validate it)
    let cfg = config::load_config_from(config_path)?;

    println!("{}", "✓ Configuration test successful".green());
    println!();

    println!("{}", "Configuration Summary:".bold());
    println!("  {}: {}:{}", "Server".cyan(), cfg.server.host, cfg.server.port);
    println!("  {}: {}", "Log Level".cyan(), cfg.server.log_level);
    println!("  {}: {}", "Log Format".cyan(), cfg.server.log_format);
    println!();

    println!(
        "  {}: {}",
        "Auth".cyan(),
        if cfg.auth.enabled {
            "enabled".green()
        } else {
            "disabled".red()
        }
    );
    for (idx, key_cfg) in cfg.auth.api_keys.iter().enumerate() {
        let status = if key_cfg.enabled {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!("    {}. {} ({})", idx + 1, key_cfg.name, status);
    }
    println!();

    println!(
        "  {}: {} (tenant {}, {:?} queries)",
        "Loki".cyan(),
        cfg.loki.base_url,
        cfg.loki.tenant_id,
        cfg.loki.query_mode
    );
    println!(
        "  {}: refresh every {}s, stale after {}s",
        "Schema".cyan(),
        cfg.schema.refresh_interval_seconds,
        cfg.schema.max_staleness_seconds
    );
    println!();

    match cfg.translation.mode {
        TranslationMode::Model => {
            println!("  {}: model", "Translation".cyan());
            println!(
                "  {}: {}",
                "Completion Backends".cyan(),
                cfg.completion.backends.len()
            );
            for backend in &cfg.completion.backends {
                println!(
                    "    {} → {}",
                    backend.name,
                    backend.models.join(", ")
                );
            }
            println!("    {} → {}", "(default)".dimmed(), cfg.completion.default_model);
            if cfg.translation.fallback_on_unavailable {
                println!("    {}", "templates used when completion is unavailable".dimmed());
            }
        }
        TranslationMode::Fallback => {
            println!("  {}: fallback templates only", "Translation".cyan());
        }
    }
    println!();

    println!(
        "  {}: {}",
        "Metrics".cyan(),
        if cfg.metrics.enabled {
            "enabled".green()
        } else {
            "disabled".red()
        }
    );

    info!("Configuration validation completed successfully");
    Ok(())
}
