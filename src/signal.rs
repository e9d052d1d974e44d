//! Triggers for the daemon loop.
//!
//! Everything that should make the daemon act (an external push event, a
//! config reload, a shutdown request) arrives as a [`Trigger`] on one
//! channel. Unix signals are mapped onto the same channel:
//!
//! - SIGINT / SIGTERM: shutdown
//! - SIGHUP: reload configuration
//! - SIGUSR1: external trigger (only root or the daemon's user can send it)

use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pending run/reload triggers beyond this are dropped; one queued run covers them all
const TRIGGER_QUEUE: usize = 16;

/// What the daemon should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A verified upstream change notification: run the full pipeline
    External,
    /// Re-read the configuration file
    Reload,
    Shutdown,
}

/// Cloneable sender side of the trigger channel.
///
/// Shutdown is a flag rather than a queue entry, so it is never lost to a
/// full queue.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<Trigger>,
    stop: Arc<watch::Sender<bool>>,
}

impl TriggerHandle {
    /// Report a verified external event. Returns false if the daemon is gone.
    pub fn external(&self) -> bool {
        self.send(Trigger::External)
    }

    pub fn reload(&self) -> bool {
        self.send(Trigger::Reload)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Trigger::Shutdown)
    }

    fn send(&self, trigger: Trigger) -> bool {
        if trigger == Trigger::Shutdown {
            return self.stop.send(true).is_ok();
        }
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Trigger queue full, dropping {:?}", trigger);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Receiving side of the trigger channel
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<Trigger>,
    stop: watch::Receiver<bool>,
}

impl TriggerReceiver {
    /// Next trigger. A pending shutdown is returned ahead of anything queued.
    /// `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<Trigger> {
        if *self.stop.borrow() {
            return Some(Trigger::Shutdown);
        }
        tokio::select! {
            biased;
            Ok(()) = self.stop.changed() => Some(Trigger::Shutdown),
            trigger = self.rx.recv() => trigger,
        }
    }
}

/// Create a trigger channel
pub fn channel() -> (TriggerHandle, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
    let (stop_tx, stop_rx) = watch::channel(false);
    (
        TriggerHandle {
            tx,
            stop: Arc::new(stop_tx),
        },
        TriggerReceiver { rx, stop: stop_rx },
    )
}

/// Forward Unix signals to `handle` until the receiver goes away.
///
/// A signal whose handler cannot be registered (restricted containers) is
/// logged and skipped; the others keep working.
///
/// Handlers are installed before this returns, so signals sent afterwards
/// are never lost to the default disposition.
pub fn spawn_signal_forwarder(handle: TriggerHandle) -> JoinHandle<()> {
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");
    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sighup = register(SignalKind::hangup(), "SIGHUP");
    let mut sigusr1 = register(SignalKind::user_defined1(), "SIGUSR1");

    if sigint.is_none() && sigterm.is_none() && sighup.is_none() && sigusr1.is_none() {
        warn!("No signal handlers registered - signals are ignored");
    }

    tokio::spawn(async move {
        loop {
            let trigger = tokio::select! {
                Some(()) = recv(&mut sigint) => {
                    info!("Received SIGINT, initiating graceful shutdown...");
                    Trigger::Shutdown
                }
                Some(()) = recv(&mut sigterm) => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    Trigger::Shutdown
                }
                Some(()) = recv(&mut sighup) => {
                    info!("Received SIGHUP, reloading configuration...");
                    Trigger::Reload
                }
                Some(()) = recv(&mut sigusr1) => {
                    info!("Received SIGUSR1, scheduling an update...");
                    Trigger::External
                }
                else => return,
            };

            if !handle.send(trigger) {
                return;
            }
        }
    })
}

fn register(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to register {} handler: {}", name, e);
            None
        }
    }
}

/// Next delivery of `sig`; never resolves when the handler is missing
async fn recv(sig: &mut Option<Signal>) -> Option<()> {
    match sig {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}
