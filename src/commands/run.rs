//! Daemon command implementation.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::{check_route_privileges, load_config};
use crate::app::App;
use crate::daemon::Daemon;
use crate::lock::LockGuard;
use crate::pipeline::RunState;
use crate::signal::spawn_signal_forwarder;

/// Run until SIGINT/SIGTERM
pub async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    check_route_privileges(&config)?;

    let app = App::from_config(config)?;
    app.store()
        .ensure_dir()
        .context("Store directory is not usable")?;
    let _instance = LockGuard::try_acquire(&app.store().daemon_lock_path())?;

    info!(
        "Managing table {} with the {} backend",
        app.config().route.table,
        app.route_table().name()
    );

    let reload_path = config_path.exists().then(|| config_path.to_path_buf());
    let daemon = Daemon::new(Arc::new(app), reload_path);
    let signals = spawn_signal_forwarder(daemon.handle());

    let last = daemon.run().await;
    signals.abort();

    match last {
        RunState::Failed { step, error } => warn!("Last update failed at '{}': {}", step, error),
        state => info!("Last update: {}", state),
    }
    Ok(())
}
