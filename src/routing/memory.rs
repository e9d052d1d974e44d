//! In-process route table for hosts without kernel route access and for tests.
//!
//! Each successful add or delete is appended to a journal, so callers can
//! check exactly which operations a reconciliation performed.

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;

use super::{Family, Route, RouteOpError, RouteTable};
use crate::error::Result;

/// Default next hop reported for IPv4 when nothing else is configured
const SIMULATED_GATEWAY_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1));

/// A mutation applied to a [`MemoryRouteTable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOp {
    Add(Route),
    Delete { table: u32, network: IpNet },
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<u32, Vec<Route>>,
    journal: Vec<RouteOp>,
    failing: HashSet<IpNet>,
}

#[derive(Debug)]
pub struct MemoryRouteTable {
    state: Mutex<State>,
    gateway_v4: Option<IpAddr>,
    gateway_v6: Option<IpAddr>,
}

impl Default for MemoryRouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRouteTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            gateway_v4: Some(SIMULATED_GATEWAY_V4),
            gateway_v6: None,
        }
    }

    /// Override the simulated default gateways
    pub fn with_default_gateways(mut self, v4: Option<IpAddr>, v6: Option<IpAddr>) -> Self {
        self.gateway_v4 = v4;
        self.gateway_v6 = v6;
        self
    }

    /// Pre-populate `table` without recording journal entries
    pub fn seed(&self, table: u32, networks: &[IpNet]) {
        let mut state = self.lock();
        let routes = state.tables.entry(table).or_default();
        for network in networks {
            routes.push(Route {
                network: *network,
                gateway: SIMULATED_GATEWAY_V4,
                table,
            });
        }
    }

    /// Make every add/delete of `network` fail with a generic error
    pub fn fail_on(&self, network: IpNet) {
        self.lock().failing.insert(network);
    }

    /// Operations applied so far, in order
    pub fn journal(&self) -> Vec<RouteOp> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Routes currently held in `table`
    pub fn routes(&self, table: u32) -> Vec<Route> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RouteTable for MemoryRouteTable {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, table: u32) -> Result<Vec<IpNet>> {
        Ok(self
            .lock()
            .tables
            .get(&table)
            .map(|routes| routes.iter().map(|r| r.network).collect())
            .unwrap_or_default())
    }

    async fn add(&self, route: &Route) -> std::result::Result<(), RouteOpError> {
        let mut state = self.lock();
        if state.failing.contains(&route.network) {
            return Err(RouteOpError::Failed("Network is unreachable".to_string()));
        }
        let routes = state.tables.entry(route.table).or_default();
        if routes.iter().any(|r| r.network == route.network) {
            return Err(RouteOpError::AlreadyExists);
        }
        routes.push(*route);
        state.journal.push(RouteOp::Add(*route));
        Ok(())
    }

    async fn delete(&self, table: u32, network: &IpNet) -> std::result::Result<(), RouteOpError> {
        let mut state = self.lock();
        if state.failing.contains(network) {
            return Err(RouteOpError::Failed("Operation not permitted".to_string()));
        }
        let routes = state.tables.entry(table).or_default();
        match routes.iter().position(|r| r.network == *network) {
            Some(idx) => {
                routes.remove(idx);
                state.journal.push(RouteOp::Delete {
                    table,
                    network: *network,
                });
                Ok(())
            }
            None => Err(RouteOpError::NotFound),
        }
    }

    async fn default_gateway(&self, family: Family) -> Result<Option<IpAddr>> {
        Ok(match family {
            Family::V4 => self.gateway_v4,
            Family::V6 => self.gateway_v6,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn route(s: &str) -> Route {
        Route {
            network: net(s),
            gateway: SIMULATED_GATEWAY_V4,
            table: 100,
        }
    }

    #[tokio::test]
    async fn test_add_list_delete() {
        let table = MemoryRouteTable::new();
        table.add(&route("10.0.0.0/8")).await.unwrap();
        table.add(&route("52.95.245.0/24")).await.unwrap();

        assert_eq!(table.list(100).await.unwrap().len(), 2);
        assert!(table.list(200).await.unwrap().is_empty());

        table.delete(100, &net("10.0.0.0/8")).await.unwrap();
        assert_eq!(table.list(100).await.unwrap(), vec![net("52.95.245.0/24")]);
        assert_eq!(table.journal().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_add_and_missing_delete() {
        let table = MemoryRouteTable::new();
        table.add(&route("10.0.0.0/8")).await.unwrap();
        assert_eq!(
            table.add(&route("10.0.0.0/8")).await,
            Err(RouteOpError::AlreadyExists)
        );
        assert_eq!(
            table.delete(100, &net("192.168.0.0/16")).await,
            Err(RouteOpError::NotFound)
        );
        // Only the first add was applied
        assert_eq!(table.journal(), vec![RouteOp::Add(route("10.0.0.0/8"))]);
    }

    #[tokio::test]
    async fn test_seed_is_not_journaled() {
        let table = MemoryRouteTable::new();
        table.seed(100, &[net("10.0.0.0/8")]);
        assert_eq!(table.list(100).await.unwrap(), vec![net("10.0.0.0/8")]);
        assert!(table.journal().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let table = MemoryRouteTable::new();
        table.fail_on(net("10.0.0.0/8"));
        assert!(matches!(
            table.add(&route("10.0.0.0/8")).await,
            Err(RouteOpError::Failed(_))
        ));
        assert!(table.routes(100).is_empty());
    }

    #[tokio::test]
    async fn test_default_gateways() {
        let table = MemoryRouteTable::new();
        assert_eq!(
            table.default_gateway(Family::V4).await.unwrap(),
            Some(SIMULATED_GATEWAY_V4)
        );
        assert_eq!(table.default_gateway(Family::V6).await.unwrap(), None);

        let v6: IpAddr = "fe80::1".parse().unwrap();
        let table = MemoryRouteTable::new().with_default_gateways(None, Some(v6));
        assert_eq!(table.default_gateway(Family::V4).await.unwrap(), None);
        assert_eq!(table.default_gateway(Family::V6).await.unwrap(), Some(v6));
    }
}
