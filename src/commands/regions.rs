//! Regions command implementation.

use anyhow::Result;
use std::path::Path;

use super::{load_config, open_app};

/// Print the region/service indices of the cached feed
pub async fn run(by_service: bool, config_path: &Path) -> Result<()> {
    let app = open_app(load_config(config_path)?).await?;
    let Some(set) = app.snapshot() else {
        anyhow::bail!("No feed cached yet; run 'awsrangeroute update' first");
    };

    let (title, index) = if by_service {
        ("Services", set.service_to_regions())
    } else {
        ("Regions", set.region_to_services())
    };

    println!("{} ({}):", title, index.len());
    for (key, values) in index {
        println!("  {:<20} {}", key, values.join(", "));
    }
    Ok(())
}
