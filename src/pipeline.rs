//! The update pipeline: fixed, labeled steps run in order until one fails.
//!
//! Progress is published on a `watch` channel, so status readers never wait
//! on a running pipeline. Runs are serialized; a failed run leaves nothing
//! behind that stops the next one from starting.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

use crate::error::Result;

#[cfg(test)]
use mockall::automock;

/// One named step of a full update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    UpdatePrefixes,
    LoadSelections,
    LoadCustomRanges,
    SetupRoutingTable,
}

impl Step {
    /// Execution order of a full run
    pub const ALL: [Step; 4] = [
        Step::UpdatePrefixes,
        Step::LoadSelections,
        Step::LoadCustomRanges,
        Step::SetupRoutingTable,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Step::UpdatePrefixes => "update prefixes",
            Step::LoadSelections => "load selections",
            Step::LoadCustomRanges => "load custom ranges",
            Step::SetupRoutingTable => "setup routing table",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where the most recent run is, or how it ended
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    NotStarted,
    Running(Step),
    Finished,
    Failed { step: Step, error: String },
}

impl RunState {
    /// Label of the current or last executed step
    pub fn label(&self) -> Option<&'static str> {
        match self {
            RunState::NotStarted | RunState::Finished => None,
            RunState::Running(step) | RunState::Failed { step, .. } => Some(step.label()),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RunState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// True once a run has ended, successfully or not
    pub fn finished(&self) -> bool {
        matches!(self, RunState::Finished | RunState::Failed { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => f.write_str("not started"),
            RunState::Running(step) => write!(f, "running: {}", step),
            RunState::Finished => f.write_str("finished"),
            RunState::Failed { step, error } => write!(f, "failed at {}: {}", step, error),
        }
    }
}

/// Executes a single pipeline step
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, step: Step) -> Result<()>;
}

pub struct Pipeline {
    status: watch::Sender<RunState>,
    serial: Mutex<()>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        let (status, _) = watch::channel(RunState::NotStarted);
        Self {
            status,
            serial: Mutex::new(()),
        }
    }

    /// Latest published state
    pub fn status(&self) -> RunState {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.status.subscribe()
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// A run started while another is in progress waits for it to end.
    pub async fn run(&self, runner: &dyn StepRunner) -> RunState {
        let _serial = self.serial.lock().await;

        for step in Step::ALL {
            self.status.send_replace(RunState::Running(step));
            info!("Pipeline step: {}", step);

            if let Err(e) = runner.run_step(step).await {
                error!("Pipeline failed at '{}': {}", step, e);
                let state = RunState::Failed {
                    step,
                    error: e.to_string(),
                };
                self.status.send_replace(state.clone());
                return state;
            }
        }

        info!("Pipeline finished");
        self.status.send_replace(RunState::Finished);
        RunState::Finished
    }
}
