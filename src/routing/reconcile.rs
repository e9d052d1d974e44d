//! Converge a routing table onto the desired route set.
//!
//! The table is listed once, each existing destination is looked up in the
//! sorted desired list, and only the difference is applied: stale routes are
//! deleted first, then missing ones are added. Routes present on both sides
//! are never touched.

use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Family, Route, RouteOpError, RouteTable};
use crate::config::RouteConfig;
use crate::error::{Error, Result};
use crate::lock::LockGuard;
use crate::routes::canonical;

/// Which table to manage and where its routes point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSettings {
    pub table: u32,
    /// Next hop for IPv4 routes; the host default route when unset
    pub gateway: Option<IpAddr>,
    pub gateway_v6: Option<IpAddr>,
}

impl From<&RouteConfig> for RouteSettings {
    fn from(config: &RouteConfig) -> Self {
        Self {
            table: config.table,
            gateway: config.gateway.filter(is_specified),
            gateway_v6: config.gateway_v6.filter(is_specified),
        }
    }
}

// 0.0.0.0 and :: mean "no gateway configured"
fn is_specified(gateway: &IpAddr) -> bool {
    !gateway.is_unspecified()
}

/// Changes needed to turn the existing table into the desired one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub delete: Vec<IpNet>,
    pub add: Vec<IpNet>,
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.add.is_empty()
    }
}

/// What a reconciliation did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Diff `existing` against `desired`.
///
/// Each existing route is matched at most once, so a destination listed
/// twice in the table keeps one copy and deletes the other.
pub fn plan(existing: &[IpNet], desired: &[IpNet]) -> ReconcilePlan {
    let mut wanted: Vec<(String, IpNet)> = desired.iter().map(|n| (canonical(n), *n)).collect();
    wanted.sort_by(|a, b| a.0.cmp(&b.0));
    wanted.dedup_by(|a, b| a.0 == b.0);

    let mut delete = Vec::new();
    let mut unchanged = 0;
    for route in existing {
        let key = canonical(route);
        match wanted.binary_search_by(|(k, _)| k.as_str().cmp(key.as_str())) {
            Ok(idx) => {
                wanted.remove(idx);
                unchanged += 1;
            }
            Err(_) => delete.push(*route),
        }
    }

    ReconcilePlan {
        delete,
        add: wanted.into_iter().map(|(_, net)| net).collect(),
        unchanged,
    }
}

/// Applies route sets to one [`RouteTable`], one reconciliation at a time
pub struct Reconciler {
    table: Arc<dyn RouteTable>,
    serial: Mutex<()>,
    host_lock: Option<PathBuf>,
}

impl Reconciler {
    pub fn new(table: Arc<dyn RouteTable>) -> Self {
        Self {
            table,
            serial: Mutex::new(()),
            host_lock: None,
        }
    }

    /// Also take an flock on `path` around every reconciliation, so other
    /// processes on the host are serialized with this one
    pub fn with_host_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_lock = Some(path.into());
        self
    }

    pub fn table(&self) -> &Arc<dyn RouteTable> {
        &self.table
    }

    /// Compute what [`Reconciler::reconcile`] would do without changing anything
    pub async fn preview(&self, desired: &[IpNet], settings: &RouteSettings) -> Result<ReconcilePlan> {
        let existing = self.table.list(settings.table).await?;
        Ok(plan(&existing, desired))
    }

    /// Make table `settings.table` hold exactly `desired`.
    ///
    /// An add that finds the route already there and a delete that finds it
    /// already gone both count as done. Any other failure stops the run and
    /// leaves the remaining changes unapplied.
    pub async fn reconcile(&self, desired: &[IpNet], settings: &RouteSettings) -> Result<ReconcileReport> {
        let _serial = self.serial.lock().await;
        let _host = self.lock_host().await?;

        info!(
            "Refreshing {} routes in table {} ({} backend)",
            desired.len(),
            settings.table,
            self.table.name()
        );

        let existing = self.table.list(settings.table).await?;
        let plan = plan(&existing, desired);
        debug!(
            "Route plan: {} to delete, {} to add, {} unchanged",
            plan.delete.len(),
            plan.add.len(),
            plan.unchanged
        );

        let mut report = ReconcileReport {
            unchanged: plan.unchanged,
            ..Default::default()
        };

        for network in &plan.delete {
            match self.table.delete(settings.table, network).await {
                Ok(()) => debug!("Deleted route {}", network),
                Err(RouteOpError::NotFound) => warn!("Route {} was already gone", network),
                Err(e) => {
                    return Err(Error::RouteKernel {
                        network: *network,
                        message: format!("delete failed: {}", e),
                    })
                }
            }
            report.deleted += 1;
        }

        let mut gateways: HashMap<Family, IpAddr> = HashMap::new();
        for network in &plan.add {
            let family = Family::of(network);
            let gateway = match gateways.get(&family) {
                Some(gw) => *gw,
                None => {
                    let gw = self.resolve_gateway(family, settings, network).await?;
                    gateways.insert(family, gw);
                    gw
                }
            };

            let route = Route {
                network: *network,
                gateway,
                table: settings.table,
            };
            match self.table.add(&route).await {
                Ok(()) => debug!("Added route {} via {}", network, gateway),
                Err(RouteOpError::AlreadyExists) => debug!("Route {} already present", network),
                Err(e) => {
                    return Err(Error::RouteKernel {
                        network: *network,
                        message: format!("add failed: {}", e),
                    })
                }
            }
            report.added += 1;
        }

        info!(
            "Table {} updated: {} added, {} deleted, {} unchanged",
            settings.table, report.added, report.deleted, report.unchanged
        );
        Ok(report)
    }

    async fn resolve_gateway(
        &self,
        family: Family,
        settings: &RouteSettings,
        network: &IpNet,
    ) -> Result<IpAddr> {
        let configured = match family {
            Family::V4 => settings.gateway,
            Family::V6 => settings.gateway_v6,
        };
        if let Some(gateway) = configured.filter(is_specified) {
            return Ok(gateway);
        }

        match self.table.default_gateway(family).await? {
            Some(gateway) => {
                debug!("Using default {} gateway {}", family.name(), gateway);
                Ok(gateway)
            }
            None => Err(Error::NoGateway {
                family: family.name(),
                network: *network,
            }),
        }
    }

    async fn lock_host(&self) -> Result<Option<LockGuard>> {
        let Some(path) = self.host_lock.clone() else {
            return Ok(None);
        };
        let guard = tokio::task::spawn_blocking(move || LockGuard::acquire(&path))
            .await
            .map_err(|e| Error::RouteTable(format!("lock task failed: {}", e)))??;
        Ok(Some(guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{MemoryRouteTable, RouteOp};
    use tempfile::TempDir;

    const SETTINGS: RouteSettings = RouteSettings {
        table: 100,
        gateway: None,
        gateway_v6: None,
    };

    fn nets(list: &[&str]) -> Vec<IpNet> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn setup(existing: &[&str]) -> (Arc<MemoryRouteTable>, Reconciler) {
        let table = Arc::new(MemoryRouteTable::new());
        table.seed(100, &nets(existing));
        let reconciler = Reconciler::new(table.clone());
        (table, reconciler)
    }

    fn sorted(mut list: Vec<IpNet>) -> Vec<IpNet> {
        list.sort_by_key(canonical);
        list
    }

    #[test]
    fn test_plan_diff() {
        let existing = nets(&["10.0.0.0/8", "18.208.0.0/13", "172.16.0.0/12"]);
        let desired = nets(&["18.208.0.0/13", "52.95.245.0/24"]);

        let plan = plan(&existing, &desired);
        assert_eq!(plan.delete, nets(&["10.0.0.0/8", "172.16.0.0/12"]));
        assert_eq!(plan.add, nets(&["52.95.245.0/24"]));
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_plan_duplicate_existing() {
        let existing = nets(&["18.208.0.0/13", "18.208.0.0/13"]);
        let desired = nets(&["18.208.0.0/13"]);

        let plan = plan(&existing, &desired);
        assert_eq!(plan.delete, nets(&["18.208.0.0/13"]));
        assert!(plan.add.is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_plan_unsorted_desired() {
        let existing = nets(&["52.95.245.0/24"]);
        let desired = nets(&["52.95.245.0/24", "10.10.10.0/24"]);
        let plan = plan(&existing, &desired);
        assert!(plan.delete.is_empty());
        assert_eq!(plan.add, nets(&["10.10.10.0/24"]));
    }

    #[tokio::test]
    async fn test_reconcile_applies_difference() {
        let (table, reconciler) = setup(&["10.0.0.0/8", "18.208.0.0/13"]);
        let desired = nets(&["18.208.0.0/13", "52.95.245.0/24"]);

        let report = reconciler.reconcile(&desired, &SETTINGS).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                added: 1,
                deleted: 1,
                unchanged: 1
            }
        );
        assert_eq!(sorted(table.list(100).await.unwrap()), desired);

        let gateway: IpAddr = "192.168.0.1".parse().unwrap();
        assert_eq!(
            table.journal(),
            vec![
                RouteOp::Delete {
                    table: 100,
                    network: "10.0.0.0/8".parse().unwrap()
                },
                RouteOp::Add(Route {
                    network: "52.95.245.0/24".parse().unwrap(),
                    gateway,
                    table: 100
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_equal_sets_is_noop() {
        let (table, reconciler) = setup(&["18.208.0.0/13", "52.95.245.0/24"]);
        let desired = nets(&["18.208.0.0/13", "52.95.245.0/24"]);

        let report = reconciler.reconcile(&desired, &SETTINGS).await.unwrap();
        assert_eq!(report.added + report.deleted, 0);
        assert_eq!(report.unchanged, 2);
        assert!(table.journal().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_empty_desired_clears_table() {
        let (table, reconciler) = setup(&["18.208.0.0/13", "52.95.245.0/24"]);
        let report = reconciler.reconcile(&[], &SETTINGS).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert!(table.list(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configured_gateway_wins() {
        let (table, reconciler) = setup(&[]);
        let settings = RouteSettings {
            gateway: Some("10.0.0.254".parse().unwrap()),
            ..SETTINGS
        };
        reconciler
            .reconcile(&nets(&["52.95.245.0/24"]), &settings)
            .await
            .unwrap();
        assert_eq!(table.routes(100)[0].gateway, settings.gateway.unwrap());
    }

    #[tokio::test]
    async fn test_unspecified_gateway_uses_default_route() {
        let (table, reconciler) = setup(&[]);
        let settings = RouteSettings {
            gateway: Some("0.0.0.0".parse().unwrap()),
            ..SETTINGS
        };
        reconciler
            .reconcile(&nets(&["52.95.245.0/24"]), &settings)
            .await
            .unwrap();
        let expected: IpAddr = "192.168.0.1".parse().unwrap();
        assert_eq!(table.routes(100)[0].gateway, expected);
    }

    #[test]
    fn test_settings_drop_unspecified_gateways() {
        let config = RouteConfig {
            gateway: Some("0.0.0.0".parse().unwrap()),
            gateway_v6: Some("::".parse().unwrap()),
            ..RouteConfig::default()
        };
        let settings = RouteSettings::from(&config);
        assert_eq!(settings.gateway, None);
        assert_eq!(settings.gateway_v6, None);

        let config = RouteConfig {
            gateway: Some("10.0.0.254".parse().unwrap()),
            ..RouteConfig::default()
        };
        assert_eq!(RouteSettings::from(&config).gateway, config.gateway);
    }

    #[tokio::test]
    async fn test_missing_v6_gateway() {
        let (table, reconciler) = setup(&[]);
        let err = reconciler
            .reconcile(&nets(&["18.208.0.0/13", "2600:1f18::/33"]), &SETTINGS)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoGateway { family: "IPv6", .. }));
        // The IPv4 route sorted ahead of it was still installed
        assert_eq!(table.list(100).await.unwrap(), nets(&["18.208.0.0/13"]));
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_adds() {
        let (table, reconciler) = setup(&[]);
        table.fail_on("18.208.0.0/13".parse().unwrap());

        let desired = nets(&["10.10.10.0/24", "18.208.0.0/13", "52.95.245.0/24"]);
        let err = reconciler.reconcile(&desired, &SETTINGS).await.unwrap_err();
        assert!(matches!(err, Error::RouteKernel { .. }));
        assert_eq!(table.list(100).await.unwrap(), nets(&["10.10.10.0/24"]));
    }

    #[tokio::test]
    async fn test_other_tables_untouched() {
        let table = Arc::new(MemoryRouteTable::new());
        table.seed(200, &nets(&["10.0.0.0/8"]));
        let reconciler = Reconciler::new(table.clone());

        reconciler.reconcile(&[], &SETTINGS).await.unwrap();
        assert_eq!(table.list(200).await.unwrap(), nets(&["10.0.0.0/8"]));
    }

    #[tokio::test]
    async fn test_preview_changes_nothing() {
        let (table, reconciler) = setup(&["10.0.0.0/8"]);
        let plan = reconciler
            .preview(&nets(&["52.95.245.0/24"]), &SETTINGS)
            .await
            .unwrap();
        assert_eq!(plan.delete, nets(&["10.0.0.0/8"]));
        assert_eq!(plan.add, nets(&["52.95.245.0/24"]));
        assert!(table.journal().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_with_host_lock() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("reconcile.lock");
        let table = Arc::new(MemoryRouteTable::new());
        let reconciler = Reconciler::new(table.clone()).with_host_lock(&lock);

        reconciler
            .reconcile(&nets(&["52.95.245.0/24"]), &SETTINGS)
            .await
            .unwrap();
        assert!(lock.exists());
        // Released afterwards
        LockGuard::try_acquire(&lock).unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_reconciles_serialize() {
        let table = Arc::new(MemoryRouteTable::new());
        let reconciler = Arc::new(Reconciler::new(table.clone()));
        let a = nets(&["10.0.0.0/8", "18.208.0.0/13"]);
        let b = nets(&["18.208.0.0/13", "52.95.245.0/24"]);

        let (ra, rb) = tokio::join!(
            reconciler.reconcile(&a, &SETTINGS),
            reconciler.reconcile(&b, &SETTINGS)
        );
        ra.unwrap();
        rb.unwrap();

        // Whichever ran last fully determines the table
        let result = sorted(table.list(100).await.unwrap());
        assert!(result == a || result == b);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::routing::{MemoryRouteTable, RouteOp};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn network_set() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set(
            (0u8..8, 0u8..4).prop_map(|(a, b)| format!("10.{}.{}.0/24", a, b)),
            0..16,
        )
    }

    proptest! {
        /// Exactly |E\D| deletes and |D\E| adds, and the table ends as D
        #[test]
        fn prop_minimal_operations(existing in network_set(), desired in network_set()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let table = Arc::new(MemoryRouteTable::new());
            let existing_nets: Vec<IpNet> = existing.iter().map(|s| s.parse().unwrap()).collect();
            let desired_nets: Vec<IpNet> = desired.iter().map(|s| s.parse().unwrap()).collect();
            table.seed(100, &existing_nets);

            let reconciler = Reconciler::new(table.clone());
            let settings = RouteSettings { table: 100, gateway: None, gateway_v6: None };
            let report = rt.block_on(reconciler.reconcile(&desired_nets, &settings)).unwrap();

            let journal = table.journal();
            let adds = journal.iter().filter(|op| matches!(op, RouteOp::Add(_))).count();
            let deletes = journal.len() - adds;
            prop_assert_eq!(deletes, existing.difference(&desired).count());
            prop_assert_eq!(adds, desired.difference(&existing).count());
            prop_assert_eq!(report.unchanged, existing.intersection(&desired).count());

            let mut after: Vec<String> = rt
                .block_on(table.list(100))
                .unwrap()
                .iter()
                .map(canonical)
                .collect();
            after.sort();
            prop_assert_eq!(after, desired.into_iter().collect::<Vec<_>>());
        }
    }
}
