//! Error types for awsrangeroute.

use std::io;
use std::path::PathBuf;

use ipnet::IpNet;
use thiserror::Error;

/// Errors produced by the route synchronization core.
///
/// Each variant maps to one failure domain of the update pipeline so the
/// status surface can report which kind of step broke.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed fetch failed: {0}")]
    FeedFetch(String),

    #[error("Feed parse failed: {0}")]
    FeedParse(String),

    #[error("Persistence error on {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt state file {path:?}: {message}")]
    CorruptState { path: PathBuf, message: String },

    #[error("Route operation failed for {network}: {message}")]
    RouteKernel { network: IpNet, message: String },

    #[error("Route table error: {0}")]
    RouteTable(String),

    #[error("No {family} gateway available for {network}")]
    NoGateway { family: &'static str, network: IpNet },

    #[error("Prefix data not loaded yet")]
    NotLoaded,

    #[error("Invalid selector '{0}': expected <region>:<service>")]
    InvalidSelector(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
