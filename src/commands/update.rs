//! Update command implementation.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::{check_route_privileges, load_config};
use crate::app::App;
use crate::pipeline::RunState;
use crate::utils::{format_age, format_count_with_separator};

/// Run the update command: one full pipeline run, or a preview with `dry_run`
pub async fn run(dry_run: bool, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    if dry_run {
        let app = App::from_config(config)?;
        return preview(&app).await;
    }

    check_route_privileges(&config)?;
    let app = App::from_config(config)?;

    info!("Updating routes from {}", app.config().feed.url);
    let state = app.run_pipeline().await;
    print_summary(&app);

    match state {
        RunState::Finished => {
            println!("[OK] Routing table {} is up to date", app.config().route.table);
            Ok(())
        }
        RunState::Failed { step, error } => {
            anyhow::bail!("Update failed at '{}': {}", step, error)
        }
        other => anyhow::bail!("Update ended in unexpected state: {}", other),
    }
}

/// Fetch and compute without touching the routing table
async fn preview(app: &App) -> Result<()> {
    app.update_prefixes().await.context("Failed to update prefixes")?;
    app.load_selections()?;
    app.load_customs()?;

    let plan = app.preview().await?;
    print_summary(app);

    println!();
    println!("[DRY-RUN] Changes for table {}:", app.config().route.table);
    if plan.is_empty() {
        println!("  (none, {} routes already in place)", plan.unchanged);
        return Ok(());
    }
    for network in &plan.delete {
        println!("  - {}", network);
    }
    for network in &plan.add {
        println!("  + {}", network);
    }
    println!(
        "  {} to delete, {} to add, {} unchanged",
        plan.delete.len(),
        plan.add.len(),
        plan.unchanged
    );
    Ok(())
}

fn print_summary(app: &App) {
    println!();
    println!(
        "Prefixes:   {} total, {} selected",
        format_count_with_separator(app.total_count()),
        format_count_with_separator(app.filtered_count())
    );
    println!(
        "Routes:     {} desired ({} custom)",
        format_count_with_separator(app.current_desired_routes().len()),
        app.customs().len()
    );
    match app.last_updated() {
        Some(time) => println!(
            "Feed date:  {} ({})",
            time.format("%Y-%m-%d %H:%M:%S"),
            format_age(time)
        ),
        None => println!("Feed date:  never downloaded"),
    }
}
