//! CLI command implementations.

pub mod custom;
pub mod init_config;
pub mod reconcile;
pub mod regions;
pub mod routes;
pub mod run;
pub mod select;
pub mod update;

use anyhow::{Context, Result};
use std::io;
use std::path::Path;
use tracing::debug;

use crate::app::App;
use crate::config::{Config, RouteBackend};
use crate::error::Error;
use crate::routing::{check_root, detect_backend, ReconcileReport};

/// Load `path`, or the defaults when no file exists there yet
pub(crate) fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("Failed to load config from {:?}", path))
    } else {
        debug!("No config file at {:?}, using defaults", path);
        Ok(Config::default())
    }
}

/// Kernel route changes need root; the simulated table does not
pub(crate) fn check_route_privileges(config: &Config) -> Result<()> {
    let backend = match config.route.backend {
        RouteBackend::Auto => detect_backend(),
        other => other,
    };
    if backend == RouteBackend::Iproute {
        check_root()?;
    }
    Ok(())
}

/// Build the app and load the cached feed, selections and custom ranges.
/// A feed that was never downloaded is not an error here.
pub(crate) async fn open_app(config: Config) -> Result<App> {
    let app = App::from_config(config)?;
    match app.load_cached_prefixes().await {
        Ok(()) => {}
        Err(Error::Persistence { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            debug!("No cached feed yet");
        }
        Err(e) => return Err(e).context("Failed to load the cached feed"),
    }
    app.load_selections()?;
    app.load_customs()?;
    Ok(app)
}

pub(crate) fn print_report(report: Option<&ReconcileReport>) {
    match report {
        Some(r) => println!(
            "     Routes: {} added, {} deleted, {} unchanged",
            r.added, r.deleted, r.unchanged
        ),
        None => println!("     No feed cached yet; run 'awsrangeroute update' to install routes"),
    }
}
