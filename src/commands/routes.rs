//! Routes command implementation.

use anyhow::Result;
use std::path::Path;

use super::{load_config, open_app};

/// Print the desired route set, one network per line
pub async fn run(config_path: &Path) -> Result<()> {
    let app = open_app(load_config(config_path)?).await?;

    if app.snapshot().is_none() {
        eprintln!("No feed cached yet; only custom ranges are shown");
    }
    for network in app.current_desired_routes() {
        println!("{}", network);
    }
    Ok(())
}
