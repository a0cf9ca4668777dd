use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use logql_gateway::{config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // Logging settings come from the config file, so load it before dispatch.
    // Commands that report on the config still re-load it to print errors nicely.
    let (level, format) = match config::load_config_from(&args.config) {
        Ok(cfg) => (cfg.server.log_level, cfg.server.log_format),
        Err(_) => ("info".to_string(), "text".to_string()),
    };
    init_tracing(&level, &format);

    match args.get_command() {
        cli::Commands::Start => {
            commands::start::execute(&args.config).await?;
        }
        cli::Commands::Test => {
            commands::test::execute(&args.config)?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Translate {
            question,
            model,
            execute,
        } => {
            commands::translate::execute(&args.config, question, model, execute).await?;
        }
        cli::Commands::Version => {
            println!("LogQL Gateway v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
