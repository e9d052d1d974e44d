//! Kernel routing tables through iproute2.
//!
//! Every operation is one `ip` invocation. Listing uses `-json` output so we
//! never scrape the human-readable format.

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, trace};

use super::{Family, Route, RouteOpError, RouteTable};
use crate::cmd_abstraction::{args_to_strings, CommandExecutor, CommandOutput, RealCommandExecutor};
use crate::error::{Error, Result};

/// Where distributions install `ip`
const IP_CANDIDATES: &[&str] = &["/usr/sbin/ip", "/sbin/ip", "/usr/bin/ip", "/bin/ip"];

/// Absolute path of `ip`, or plain `ip` to go through `$PATH`
pub(crate) fn ip_path() -> &'static str {
    IP_CANDIDATES
        .iter()
        .copied()
        .find(|p| Path::new(p).exists())
        .unwrap_or("ip")
}

/// One entry of `ip -json route show`
#[derive(Debug, Deserialize)]
struct JsonRoute {
    dst: String,
    #[serde(default)]
    gateway: Option<String>,
}

pub struct IprouteTable {
    executor: Box<dyn CommandExecutor>,
    ip: String,
}

impl Default for IprouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl IprouteTable {
    pub fn new() -> Self {
        Self::with_executor(Box::new(RealCommandExecutor), ip_path())
    }

    pub fn with_executor(executor: Box<dyn CommandExecutor>, ip: impl Into<String>) -> Self {
        Self {
            executor,
            ip: ip.into(),
        }
    }

    fn run(&self, args: &[&str]) -> anyhow::Result<CommandOutput> {
        trace!("Running {} {}", self.ip, args.join(" "));
        self.executor.execute(&self.ip, &args_to_strings(args))
    }

    fn list_family(&self, family: Family, table: u32) -> Result<Vec<IpNet>> {
        let table_arg = table.to_string();
        let output = self
            .run(&[family_flag(family), "-json", "route", "show", "table", &table_arg])
            .map_err(|e| Error::RouteTable(format!("failed to run ip: {:#}", e)))?;

        if !output.success {
            // A table nobody has written to yet is just empty
            if output.stderr.contains("does not exist") {
                return Ok(Vec::new());
            }
            return Err(Error::RouteTable(format!(
                "ip route show table {} failed: {}",
                table,
                output.stderr.trim()
            )));
        }

        parse_route_list(&output.stdout, family)
    }
}

#[async_trait]
impl RouteTable for IprouteTable {
    fn name(&self) -> &'static str {
        "iproute"
    }

    async fn list(&self, table: u32) -> Result<Vec<IpNet>> {
        let mut routes = self.list_family(Family::V4, table)?;
        routes.extend(self.list_family(Family::V6, table)?);
        debug!("Table {} holds {} routes", table, routes.len());
        Ok(routes)
    }

    async fn add(&self, route: &Route) -> std::result::Result<(), RouteOpError> {
        let network = route.network.to_string();
        let gateway = route.gateway.to_string();
        let table = route.table.to_string();
        let output = self
            .run(&[
                family_flag(Family::of(&route.network)),
                "route",
                "add",
                &network,
                "via",
                &gateway,
                "table",
                &table,
            ])
            .map_err(|e| RouteOpError::Failed(format!("{:#}", e)))?;
        check_op(&output)
    }

    async fn delete(&self, table: u32, network: &IpNet) -> std::result::Result<(), RouteOpError> {
        let network_arg = network.to_string();
        let table_arg = table.to_string();
        let output = self
            .run(&[
                family_flag(Family::of(network)),
                "route",
                "del",
                &network_arg,
                "table",
                &table_arg,
            ])
            .map_err(|e| RouteOpError::Failed(format!("{:#}", e)))?;
        check_op(&output)
    }

    async fn default_gateway(&self, family: Family) -> Result<Option<IpAddr>> {
        let output = self
            .run(&[family_flag(family), "-json", "route", "show", "default"])
            .map_err(|e| Error::RouteTable(format!("failed to run ip: {:#}", e)))?;
        if !output.success {
            return Err(Error::RouteTable(format!(
                "ip route show default failed: {}",
                output.stderr.trim()
            )));
        }
        if output.stdout.trim().is_empty() {
            return Ok(None);
        }

        let routes: Vec<JsonRoute> = serde_json::from_str(&output.stdout)
            .map_err(|e| Error::RouteTable(format!("unreadable ip -json output: {}", e)))?;
        Ok(routes
            .iter()
            .filter_map(|r| r.gateway.as_deref())
            .find_map(|gw| gw.parse().ok()))
    }
}

fn family_flag(family: Family) -> &'static str {
    match family {
        Family::V4 => "-4",
        Family::V6 => "-6",
    }
}

/// Map `ip route add/del` exit status onto [`RouteOpError`]
fn check_op(output: &CommandOutput) -> std::result::Result<(), RouteOpError> {
    if output.success {
        return Ok(());
    }
    let stderr = output.stderr.trim();
    if stderr.contains("File exists") {
        Err(RouteOpError::AlreadyExists)
    } else if stderr.contains("No such process") {
        Err(RouteOpError::NotFound)
    } else {
        Err(RouteOpError::Failed(stderr.to_string()))
    }
}

/// Destinations from `ip -json route show` output
fn parse_route_list(stdout: &str, family: Family) -> Result<Vec<IpNet>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let routes: Vec<JsonRoute> = serde_json::from_str(stdout)
        .map_err(|e| Error::RouteTable(format!("unreadable ip -json output: {}", e)))?;

    routes
        .iter()
        .map(|r| parse_destination(&r.dst, family))
        .collect()
}

/// `default` is the whole address space; a bare address is a host route
fn parse_destination(dst: &str, family: Family) -> Result<IpNet> {
    if dst == "default" {
        let all = match family {
            Family::V4 => "0.0.0.0/0",
            Family::V6 => "::/0",
        };
        return all
            .parse()
            .map_err(|_| Error::RouteTable(format!("bad default route for {}", family.name())));
    }
    if dst.contains('/') {
        return dst
            .parse()
            .map_err(|_| Error::RouteTable(format!("unexpected route destination: {}", dst)));
    }
    dst.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| Error::RouteTable(format!("unexpected route destination: {}", dst)))
}
