//! Select command implementation.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::warn;

use super::{check_route_privileges, load_config, open_app, print_report};
use crate::app::App;
use crate::cli::SelectAction;
use crate::prefixes::Selector;

/// Run the select command
pub async fn run(action: SelectAction, config_path: &Path) -> Result<()> {
    match action {
        SelectAction::Add { selectors } => add_selections(&selectors, config_path).await,
        SelectAction::Del { selectors } => remove_selections(&selectors, config_path).await,
        SelectAction::List => list_selections(config_path).await,
        SelectAction::Clear => clear_selections(config_path).await,
    }
}

fn parse_all(raw: &[String]) -> Result<Vec<Selector>> {
    raw.iter()
        .map(|s| s.parse::<Selector>().map_err(anyhow::Error::from))
        .collect()
}

async fn open_for_edit(config_path: &Path) -> Result<App> {
    let config = load_config(config_path)?;
    check_route_privileges(&config)?;
    open_app(config).await
}

/// Add selectors and reconcile
async fn add_selections(raw: &[String], config_path: &Path) -> Result<()> {
    let requested = parse_all(raw)?;
    let app = open_for_edit(config_path).await?;

    let mut selections = app.selections();
    let mut added = Vec::new();
    for selector in requested {
        if selections.contains(&selector) {
            println!("{} is already selected", selector);
            continue;
        }
        if let Some(set) = app.snapshot() {
            if set.filter(std::slice::from_ref(&selector)).is_empty() {
                warn!("{} matches no prefix in the current feed", selector);
            }
        }
        selections.push(selector.clone());
        added.push(selector);
    }

    if added.is_empty() {
        return Ok(());
    }

    let report = app
        .set_selections(selections)
        .await
        .context("Failed to apply selections")?;
    for selector in &added {
        println!("[OK] Selected {}", selector);
    }
    print_report(report.as_ref());
    Ok(())
}

/// Remove selectors and reconcile
async fn remove_selections(raw: &[String], config_path: &Path) -> Result<()> {
    let requested = parse_all(raw)?;
    let app = open_for_edit(config_path).await?;

    let mut selections = app.selections();
    let original_len = selections.len();
    selections.retain(|s| !requested.contains(s));

    if selections.len() == original_len {
        println!("None of the given selectors were selected");
        return Ok(());
    }

    let removed = original_len - selections.len();
    let report = app
        .set_selections(selections)
        .await
        .context("Failed to apply selections")?;
    println!("[OK] Removed {} selection(s)", removed);
    print_report(report.as_ref());
    Ok(())
}

/// List selections and how many prefixes each matches
async fn list_selections(config_path: &Path) -> Result<()> {
    let app = open_app(load_config(config_path)?).await?;
    let selections = app.selections();
    let snapshot = app.snapshot();

    println!();
    println!("Selections ({} entries):", selections.len());
    println!();

    if selections.is_empty() {
        println!("  (empty)");
        return Ok(());
    }

    for selector in &selections {
        match &snapshot {
            Some(set) => {
                let matched = set.filter(std::slice::from_ref(selector)).len();
                println!("  {:<32} {} prefixes", selector.to_string(), matched);
            }
            None => println!("  {}", selector),
        }
    }
    if snapshot.is_some() {
        println!();
        println!("  {} prefixes selected in total", app.filtered_count());
    }
    Ok(())
}

/// Drop every selection and reconcile
async fn clear_selections(config_path: &Path) -> Result<()> {
    let app = open_for_edit(config_path).await?;
    let count = app.selections().len();

    let report = app
        .set_selections(Vec::new())
        .await
        .context("Failed to apply selections")?;
    println!("[OK] Cleared {} selection(s)", count);
    print_report(report.as_ref());
    Ok(())
}
