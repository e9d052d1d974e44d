//! Init-config command implementation.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::Config;

/// Write the commented default configuration to `config_path`
pub async fn run(force: bool, config_path: &Path) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
    }
    fs::write(config_path, Config::generate_default_yaml())
        .with_context(|| format!("Failed to write {:?}", config_path))?;

    println!("[OK] Wrote {}", config_path.display());
    Ok(())
}
