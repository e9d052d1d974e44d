//! # awsrangeroute
//!
//! Keeps one policy routing table on a Linux gateway in sync with the AWS
//! `ip-ranges.json` feed, narrowed to the operator's `region:service`
//! selections, plus operator-supplied custom ranges.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI (clap) / Daemon (timer, SIGHUP, SIGUSR1)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline: update prefixes → load selections →              │
//! │            load custom ranges → setup routing table         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Fetcher (reqwest + rustls, If-Modified-Since)              │
//! │  PrefixSet (streaming serde parse, filter cache)            │
//! │  Route set builder (customs + filtered, canonical order)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reconciler (RouteTable trait)                              │
//! │    ├── IprouteTable (ip -json route, Linux)                 │
//! │    └── MemoryRouteTable (simulation, tests)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use awsrangeroute::app::App;
//! use awsrangeroute::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/awsrangeroute/config.yaml")?;
//!     let app = App::from_config(config)?;
//!
//!     let state = app.run_pipeline().await;
//!     println!("{} ({} routes)", state, app.current_desired_routes().len());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`app`] - Application context shared by the daemon and the commands
//! - [`cli`] - Command-line interface definitions
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`daemon`] - Timer and trigger loop
//! - [`fetcher`] - Conditional download of the feed
//! - [`lock`] - Advisory file locks
//! - [`pipeline`] - Labeled update steps and run status
//! - [`prefixes`] - Feed parsing, indices and selection filtering
//! - [`routes`] - Custom ranges and the desired route set
//! - [`routing`] - Route table backends and reconciliation
//! - [`signal`] - Trigger channel and Unix signal mapping
//! - [`store`] - Persisted feed, selections and custom ranges

pub mod app;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod pipeline;
pub mod prefixes;
pub mod routes;
pub mod routing;
pub mod signal;
pub mod store;
pub mod utils;

pub use app::App;
pub use config::Config;
pub use error::{Error, Result};
