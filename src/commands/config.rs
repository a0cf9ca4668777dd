use anyhow::Result;
use colored::Colorize;
use logql_gateway::config::{self, Config};
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Displays the current configuration with secrets masked
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config_from(config_path)?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration file");

    let cfg = config::load_config_from(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Completion Backends: {}", cfg.completion.backends.len());
    println!("  Served Models: {}", count_served_models(&cfg));
    println!(
        "  API Keys: {} ({} enabled)",
        cfg.auth.api_keys.len(),
        cfg.auth.api_keys.iter().filter(|k| k.enabled).count()
    );

    info!("Configuration validation successful");
    Ok(())
}

/// Sanitize secrets in configuration for safe display
fn sanitize_secrets(cfg: &Config) -> Config {
    let mut sanitized = cfg.clone();

    for backend in &mut sanitized.completion.backends {
        if !backend.api_key.is_empty() {
            backend.api_key = mask_api_key(&backend.api_key);
        }
    }

    for key in &mut sanitized.auth.api_keys {
        key.key = mask_api_key(&key.key);
    }

    sanitized
}

/// Mask an API key for safe display
///
/// Shows first 7 and last 4 characters
/// Example: "sk-1234567890abcdef" -> "sk-1234...cdef"
fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 11 {
        return "***".to_string();
    }

    let prefix: String = chars[..7].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();

    format!("{}...{}", prefix, suffix)
}

/// Distinct model ids across all completion backends
fn count_served_models(cfg: &Config) -> usize {
    cfg.completion
        .backends
        .iter()
        .flat_map(|b| b.models.iter())
        .collect::<std::collections::BTreeSet<_>>()
        .len()
}
