//! Route table backends and the reconciler that drives them.

mod iproute;
mod memory;
mod reconcile;

use async_trait::async_trait;
use ipnet::IpNet;
use std::net::IpAddr;
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use iproute::IprouteTable;
pub use memory::{MemoryRouteTable, RouteOp};
pub use reconcile::{plan, ReconcilePlan, ReconcileReport, Reconciler, RouteSettings};

use crate::config::RouteBackend;
use crate::error::Result;

/// Address family of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(network: &IpNet) -> Self {
        match network {
            IpNet::V4(_) => Family::V4,
            IpNet::V6(_) => Family::V6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Family::V4 => "IPv4",
            Family::V6 => "IPv6",
        }
    }
}

/// A route to install: `network via gateway table N`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub network: IpNet,
    pub gateway: IpAddr,
    pub table: u32,
}

/// Failure of a single add/delete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteOpError {
    #[error("route already exists")]
    AlreadyExists,

    #[error("no such route")]
    NotFound,

    #[error("{0}")]
    Failed(String),
}

/// A routing table the reconciler can read and mutate
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Destinations of every route currently in `table`, both families
    async fn list(&self, table: u32) -> Result<Vec<IpNet>>;

    async fn add(&self, route: &Route) -> std::result::Result<(), RouteOpError>;

    async fn delete(&self, table: u32, network: &IpNet) -> std::result::Result<(), RouteOpError>;

    /// Next hop of the host's default route for `family`, if any
    async fn default_gateway(&self, family: Family) -> Result<Option<IpAddr>>;
}

/// Pick the route table implementation for `backend`
pub fn create_table(backend: RouteBackend) -> Arc<dyn RouteTable> {
    let actual = match backend {
        RouteBackend::Auto => detect_backend(),
        other => other,
    };
    debug!("Using {:?} route table backend", actual);

    match actual {
        RouteBackend::Iproute => Arc::new(IprouteTable::new()),
        RouteBackend::Memory | RouteBackend::Auto => Arc::new(MemoryRouteTable::new()),
    }
}

/// Kernel tables on Linux when `ip` is installed, the simulated table otherwise
pub fn detect_backend() -> RouteBackend {
    if cfg!(target_os = "linux") && Command::new(iproute::ip_path()).arg("-V").output().is_ok() {
        RouteBackend::Iproute
    } else {
        RouteBackend::Memory
    }
}

/// Check if running as root (effective UID == 0)
///
/// Adding and deleting kernel routes needs CAP_NET_ADMIN; UID 0 covers the
/// usual case of running under sudo or a system unit.
pub fn check_root() -> anyhow::Result<()> {
    // SAFETY: geteuid() has no preconditions, never fails and touches no state.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        anyhow::bail!(
            "This operation requires root privileges. Please run with sudo.\n\
             Alternatively, ensure the process has the CAP_NET_ADMIN capability."
        )
    }
    Ok(())
}
