//! Long-running mode: runs the pipeline at startup, on every polling tick and
//! on every external trigger, until asked to stop.
//!
//! At most one run is in flight. A trigger that arrives meanwhile is
//! remembered and starts exactly one follow-up run once the current one ends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::config::Config;
use crate::pipeline::RunState;
use crate::signal::{channel, Trigger, TriggerHandle, TriggerReceiver};

/// How long shutdown waits for an in-flight run
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Daemon {
    app: Arc<App>,
    config_path: Option<PathBuf>,
    handle: TriggerHandle,
    triggers: TriggerReceiver,
    grace: Duration,
}

impl Daemon {
    /// `config_path` is re-read on [`Trigger::Reload`]; without one, reloads
    /// are ignored
    pub fn new(app: Arc<App>, config_path: Option<PathBuf>) -> Self {
        let (handle, triggers) = channel();
        Self {
            app,
            config_path,
            handle,
            triggers,
            grace: SHUTDOWN_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Sender for triggers into this daemon (signals, push notifications, tests)
    pub fn handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    /// Loop until a shutdown trigger arrives
    pub async fn run(mut self) -> RunState {
        let mut runs: JoinSet<RunState> = JoinSet::new();
        let mut rerun = false;
        let mut interval = self.app.config().polling_interval();
        let mut next_tick = interval.map(|i| Instant::now() + i);

        info!(
            "Daemon started (polling: {})",
            interval.map_or_else(|| "disabled".to_string(), |i| format!("every {:?}", i))
        );
        self.start_run(&mut runs, &mut rerun, "startup");

        loop {
            tokio::select! {
                _ = sleep_until(next_tick) => {
                    self.start_run(&mut runs, &mut rerun, "timer");
                    next_tick = interval.map(|i| Instant::now() + i);
                }
                trigger = self.triggers.recv() => match trigger {
                    Some(Trigger::External) => self.start_run(&mut runs, &mut rerun, "external trigger"),
                    Some(Trigger::Reload) => {
                        if self.reload() {
                            interval = self.app.config().polling_interval();
                            next_tick = interval.map(|i| Instant::now() + i);
                        }
                    }
                    Some(Trigger::Shutdown) | None => break,
                },
                Some(finished) = runs.join_next(), if !runs.is_empty() => {
                    match finished {
                        Ok(state) => debug!("Run ended: {}", state),
                        Err(e) => error!("Pipeline task failed: {}", e),
                    }
                    if rerun {
                        rerun = false;
                        self.start_run(&mut runs, &mut rerun, "queued trigger");
                    }
                }
            }
        }

        info!("Shutting down");
        if !runs.is_empty() {
            info!("Waiting up to {:?} for the running update", self.grace);
            let drained = tokio::time::timeout(self.grace, async {
                while runs.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Update still running after {:?}, exiting anyway", self.grace);
            }
        }

        self.app.pipeline_status()
    }

    fn start_run(&self, runs: &mut JoinSet<RunState>, rerun: &mut bool, reason: &str) {
        if !runs.is_empty() {
            debug!("Update already running, queueing one more ({})", reason);
            *rerun = true;
            return;
        }
        info!("Starting update ({})", reason);
        let app = self.app.clone();
        runs.spawn(async move { app.run_pipeline().await });
    }

    /// Returns true when a new configuration was applied
    fn reload(&self) -> bool {
        let Some(path) = &self.config_path else {
            info!("No configuration file in use, nothing to reload");
            return false;
        };

        let config = match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Keeping current configuration, reload failed: {:#}", e);
                return false;
            }
        };
        match self.app.reload(config) {
            Ok(()) => true,
            Err(e) => {
                error!("Keeping current configuration, reload failed: {}", e);
                false
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
