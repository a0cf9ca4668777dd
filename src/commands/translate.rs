use anyhow::Result;
use colored::Colorize;
use logql_gateway::{config, pipeline::QueryRequest, server};
use std::path::Path;
use tracing::info;

/// Execute the translate command
///
/// Runs the pipeline once in-process. Without `--execute` the query is only
/// validated, never sent to Loki.
pub async fn execute(
    config_path: &Path,
    question: String,
    model: Option<String>,
    run_query: bool,
) -> Result<()> {
    let cfg = config::load_config_from(config_path)?;
    let orchestrator = server::build_orchestrator(&cfg)?;

    let request = QueryRequest {
        model,
        ..QueryRequest::new(question)
    };

    let output = if run_query {
        orchestrator.run(&request).await?
    } else {
        orchestrator.translate(&request).await?
    };
    info!(request_id = %output.request_id, "Translation finished");

    println!("{}", "LogQL:".green().bold());
    println!("  {}", output.query.expr());
    println!();
    println!("  {}: {}", "Source".cyan(), output.query.source());
    if let Some(label) = &output.label {
        println!("  {}: {}", "Label".cyan(), label);
    }
    println!("  {}: {}", "Attempt".cyan(), output.query.attempt());
    println!("  {}: {}", "Request ID".cyan(), output.request_id);

    if let Some(result) = output.result {
        println!();
        println!("{}", "Result:".green().bold());
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
