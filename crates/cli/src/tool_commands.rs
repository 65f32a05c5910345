use {
    anyhow::{Context, Result},
    serde_json::Value,
    toolmesh_mcp::{Aggregator, AggregatorConfig},
};

use crate::auth_commands::cancellable;

async fn connected(config: &AggregatorConfig) -> Result<Aggregator> {
    let aggregator = Aggregator::from_config(config)?;
    let report = cancellable(&aggregator, async {
        Ok::<_, anyhow::Error>(aggregator.connect().await?)
    })
    .await?;
    for warning in &report.warnings {
        eprintln!(
            "warning: endpoint '{}' unavailable: {}",
            warning.endpoint, warning.message
        );
    }
    Ok(aggregator)
}

pub async fn list(config: &AggregatorConfig, json: bool) -> Result<()> {
    let aggregator = connected(config).await?;
    let result = aggregator.get_available_tools().await;
    aggregator.disconnect().await;
    let catalog = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog.capabilities)?);
        return Ok(());
    }
    if catalog.is_empty() {
        println!("No tools available.");
        return Ok(());
    }
    for capability in &catalog.capabilities {
        println!(
            "  {} [{}]: {}",
            capability.name, capability.session_key, capability.description
        );
    }
    if !catalog.listing_failures.is_empty() {
        eprintln!(
            "warning: could not list tools from: {}",
            catalog.listing_failures.join(", ")
        );
    }
    Ok(())
}

pub async fn call(config: &AggregatorConfig, name: &str, args: &str) -> Result<()> {
    let args: Value = serde_json::from_str(args).context("arguments must be valid JSON")?;

    let aggregator = connected(config).await?;
    let outcome = aggregator.invoke(name, args).await;
    aggregator.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_ok() {
        anyhow::bail!("tool '{name}' failed");
    }
    Ok(())
}
