//! Custom range command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use super::{check_route_privileges, load_config, open_app, print_report};
use crate::cli::CustomAction;
use crate::routes::CustomRange;

/// Run the custom command
pub async fn run(action: CustomAction, config_path: &Path) -> Result<()> {
    match action {
        CustomAction::Add { networks } => add_customs(&networks, config_path).await,
        CustomAction::Del { networks } => remove_customs(&networks, config_path).await,
        CustomAction::List => list_customs(config_path).await,
    }
}

fn parse_all(raw: &[String]) -> Result<Vec<CustomRange>> {
    raw.iter()
        .map(|s| s.parse::<CustomRange>().map_err(anyhow::Error::from))
        .collect()
}

/// Add IPs/CIDRs and reconcile
async fn add_customs(raw: &[String], config_path: &Path) -> Result<()> {
    let requested = parse_all(raw)?;
    let config = load_config(config_path)?;
    check_route_privileges(&config)?;
    let app = open_app(config).await?;

    let mut customs = app.customs();
    let mut added = Vec::new();
    for range in requested {
        if customs.contains(&range) {
            println!("{} is already a custom range", range);
            continue;
        }
        customs.push(range);
        added.push(range);
    }

    if added.is_empty() {
        return Ok(());
    }

    let report = app
        .set_customs(customs)
        .await
        .context("Failed to apply custom ranges")?;
    for range in &added {
        println!("[OK] Added custom range {}", range);
    }
    print_report(report.as_ref());
    Ok(())
}

/// Remove IPs/CIDRs and reconcile
async fn remove_customs(raw: &[String], config_path: &Path) -> Result<()> {
    let requested = parse_all(raw)?;
    let config = load_config(config_path)?;
    check_route_privileges(&config)?;
    let app = open_app(config).await?;

    let mut customs = app.customs();
    let original_len = customs.len();
    customs.retain(|c| !requested.contains(c));

    if customs.len() == original_len {
        println!("None of the given ranges were custom ranges");
        return Ok(());
    }

    let removed = original_len - customs.len();
    let report = app
        .set_customs(customs)
        .await
        .context("Failed to apply custom ranges")?;
    println!("[OK] Removed {} custom range(s)", removed);
    print_report(report.as_ref());
    Ok(())
}

/// List custom ranges
async fn list_customs(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let customs = crate::store::Store::new(&config.store).load_customs()?;

    println!();
    println!("Custom ranges ({} entries):", customs.len());
    println!();

    if customs.is_empty() {
        println!("  (empty)");
    } else {
        for range in &customs {
            println!("  {}", range);
        }
    }
    Ok(())
}
