//! Reconcile command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use super::{check_route_privileges, load_config, open_app, print_report};

/// Re-apply the route set from the cached feed without downloading anything
pub async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    check_route_privileges(&config)?;

    let app = open_app(config).await?;
    let report = app
        .reconcile()
        .await
        .context("Reconcile failed (has 'awsrangeroute update' been run yet?)")?;

    println!("[OK] Routing table {} reconciled", app.config().route.table);
    print_report(Some(&report));
    Ok(())
}
