//! The application context tying the feed, the operator's choices and the
//! route table together.
//!
//! One `App` is built at startup and shared (`Arc<App>`) between the daemon
//! loop and whatever issues manual edits. The prefix snapshot is swapped
//! wholesale; readers keep whichever `Arc<PrefixSet>` they picked up.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use ipnet::IpNet;
use std::io::BufReader;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::{FeedDownload, Fetcher};
use crate::pipeline::{Pipeline, RunState, Step, StepRunner};
use crate::prefixes::{Prefix, PrefixSet, Selector};
use crate::routes::{desired_routes, CustomRange};
use crate::routing::{create_table, ReconcilePlan, ReconcileReport, Reconciler, RouteSettings, RouteTable};
use crate::store::Store;

pub struct App {
    config: RwLock<Config>,
    store: Store,
    fetcher: RwLock<Arc<Fetcher>>,
    snapshot: RwLock<Option<Arc<PrefixSet>>>,
    selections: RwLock<Vec<Selector>>,
    customs: RwLock<Vec<CustomRange>>,
    reconciler: Reconciler,
    pipeline: Pipeline,
    edits: Mutex<()>,
}

impl App {
    /// Build the context with the route backend named in the config
    pub fn from_config(config: Config) -> Result<Self> {
        let table = create_table(config.route.backend);
        Self::new(config, table)
    }

    pub fn new(config: Config, table: Arc<dyn RouteTable>) -> Result<Self> {
        let store = Store::new(&config.store);
        let fetcher = Fetcher::new(&config.feed.url, config.fetch_timeout())?;
        let reconciler = Reconciler::new(table).with_host_lock(store.lock_path());

        Ok(Self {
            config: RwLock::new(config),
            store,
            fetcher: RwLock::new(Arc::new(fetcher)),
            snapshot: RwLock::new(None),
            selections: RwLock::new(Vec::new()),
            customs: RwLock::new(Vec::new()),
            reconciler,
            pipeline: Pipeline::new(),
            edits: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> Config {
        read(&self.config).clone()
    }

    pub fn route_table(&self) -> &Arc<dyn RouteTable> {
        self.reconciler.table()
    }

    /// Current prefix snapshot, if a feed has been loaded
    pub fn snapshot(&self) -> Option<Arc<PrefixSet>> {
        read(&self.snapshot).clone()
    }

    pub fn selections(&self) -> Vec<Selector> {
        read(&self.selections).clone()
    }

    pub fn customs(&self) -> Vec<CustomRange> {
        read(&self.customs).clone()
    }

    /// Run every pipeline step; the outcome is also published to status readers
    pub async fn run_pipeline(&self) -> RunState {
        self.pipeline.run(self).await
    }

    pub fn pipeline_status(&self) -> RunState {
        self.pipeline.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RunState> {
        self.pipeline.subscribe()
    }

    /// Fetch the feed (conditionally) and swap in the parsed snapshot
    pub async fn update_prefixes(&self) -> Result<()> {
        let fetcher = read(&self.fetcher).clone();
        let accept_ipv6 = read(&self.config).feed.ipv6;
        self.store.ensure_dir()?;

        let set = match fetcher.fetch(&self.store).await? {
            FeedDownload::Modified(staged) => {
                let file = staged
                    .reopen()
                    .map_err(|e| Error::persistence(staged.path(), e))?;
                match parse_in_background(accept_ipv6, file).await {
                    Ok(set) => {
                        self.store.commit_feed(staged)?;
                        set
                    }
                    Err(e) => {
                        self.store.discard_feed()?;
                        return Err(e);
                    }
                }
            }
            FeedDownload::NotModified => self.parse_cached_feed(accept_ipv6).await?,
        };

        info!(
            "Loaded {} prefixes ({} regions, {} services)",
            set.len(),
            set.region_to_services().len(),
            set.service_to_regions().len()
        );
        *write(&self.snapshot) = Some(Arc::new(set));
        Ok(())
    }

    /// Populate the snapshot from the persisted feed without any network access
    pub async fn load_cached_prefixes(&self) -> Result<()> {
        let accept_ipv6 = read(&self.config).feed.ipv6;
        let set = self.parse_cached_feed(accept_ipv6).await?;
        debug!("Loaded {} prefixes from cache", set.len());
        *write(&self.snapshot) = Some(Arc::new(set));
        Ok(())
    }

    /// Replace the in-memory selections with the persisted ones.
    /// Not serialized against edits; the pipeline step is.
    pub fn load_selections(&self) -> Result<()> {
        let selections = self.store.load_selections()?;
        debug!("Loaded {} selections", selections.len());
        *write(&self.selections) = selections;
        Ok(())
    }

    pub fn load_customs(&self) -> Result<()> {
        let customs = self.store.load_customs()?;
        debug!("Loaded {} custom ranges", customs.len());
        *write(&self.customs) = customs;
        Ok(())
    }

    /// Prefixes selected from the current snapshot
    pub fn filtered(&self) -> Arc<[Prefix]> {
        match self.snapshot() {
            Some(set) => set.filter(&self.selections()),
            None => Arc::from(Vec::new()),
        }
    }

    /// The sorted, deduplicated route set the table should hold right now
    pub fn current_desired_routes(&self) -> Vec<IpNet> {
        desired_routes(&self.customs(), &self.filtered())
    }

    pub fn filtered_count(&self) -> usize {
        self.filtered().len()
    }

    pub fn total_count(&self) -> usize {
        self.snapshot().map_or(0, |set| set.len())
    }

    /// When the persisted feed was last replaced
    pub fn last_updated(&self) -> Option<DateTime<Local>> {
        self.store.feed_modified().map(DateTime::<Local>::from)
    }

    /// Bring the route table in line with the current route set.
    ///
    /// Refuses to run before any feed was loaded, since that would strip
    /// every feed route from the table.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        if self.snapshot().is_none() {
            return Err(Error::NotLoaded);
        }
        let desired = self.current_desired_routes();
        let settings = self.route_settings();
        self.reconciler.reconcile(&desired, &settings).await
    }

    /// What [`App::reconcile`] would change, without changing it
    pub async fn preview(&self) -> Result<ReconcilePlan> {
        if self.snapshot().is_none() {
            return Err(Error::NotLoaded);
        }
        let desired = self.current_desired_routes();
        self.reconciler.preview(&desired, &self.route_settings()).await
    }

    /// Persist a new selection list, then reconcile if a feed is loaded
    pub async fn set_selections(&self, selections: Vec<Selector>) -> Result<Option<ReconcileReport>> {
        let _edit = self.edits.lock().await;
        self.store.save_selections(&selections)?;
        info!("Saved {} selections", selections.len());
        *write(&self.selections) = selections;
        self.reconcile_after_edit().await
    }

    /// Persist a new custom range list, then reconcile if a feed is loaded
    pub async fn set_customs(&self, customs: Vec<CustomRange>) -> Result<Option<ReconcileReport>> {
        let _edit = self.edits.lock().await;
        self.store.save_customs(&customs)?;
        info!("Saved {} custom ranges", customs.len());
        *write(&self.customs) = customs;
        self.reconcile_after_edit().await
    }

    /// Apply a new configuration.
    ///
    /// Feed, routing and polling settings take effect immediately. The store
    /// directory and route backend are fixed for the life of the process.
    pub fn reload(&self, config: Config) -> Result<()> {
        config
            .validate()
            .map_err(|e| Error::Config(format!("{:#}", e)))?;
        let fetcher = Fetcher::new(&config.feed.url, config.fetch_timeout())?;

        {
            let current = read(&self.config);
            if current.store != config.store {
                warn!("Store directory change to {:?} needs a restart", config.store);
            }
            if current.route.backend != config.route.backend {
                warn!("Route backend change needs a restart");
            }
        }

        *write(&self.fetcher) = Arc::new(fetcher);
        *write(&self.config) = config;
        info!("Configuration reloaded");
        Ok(())
    }

    fn route_settings(&self) -> RouteSettings {
        RouteSettings::from(&read(&self.config).route)
    }

    async fn reconcile_after_edit(&self) -> Result<Option<ReconcileReport>> {
        if self.snapshot().is_none() {
            debug!("No feed loaded yet, routes follow on the next update");
            return Ok(None);
        }
        self.reconcile().await.map(Some)
    }

    async fn parse_cached_feed(&self, accept_ipv6: bool) -> Result<PrefixSet> {
        let file = self.store.open_feed()?;
        match parse_in_background(accept_ipv6, file).await {
            Ok(set) => Ok(set),
            Err(e) => {
                warn!("Cached feed is unreadable, discarding it: {}", e);
                self.store.discard_feed()?;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl StepRunner for App {
    async fn run_step(&self, step: Step) -> Result<()> {
        match step {
            Step::UpdatePrefixes => self.update_prefixes().await,
            // Holding the edit lock keeps a concurrent edit from being
            // overwritten by the file contents read just before it landed
            Step::LoadSelections => {
                let _edit = self.edits.lock().await;
                self.load_selections()
            }
            Step::LoadCustomRanges => {
                let _edit = self.edits.lock().await;
                self.load_customs()
            }
            Step::SetupRoutingTable => self.reconcile().await.map(|_| ()),
        }
    }
}

/// Parse on the blocking pool so a multi-megabyte feed does not stall the runtime
async fn parse_in_background(accept_ipv6: bool, file: std::fs::File) -> Result<PrefixSet> {
    tokio::task::spawn_blocking(move || PrefixSet::parse(accept_ipv6, BufReader::new(file)))
        .await
        .map_err(|e| Error::FeedParse(format!("parser task failed: {}", e)))?
}

// Poisoning only means another thread panicked mid-swap; the value is still whole.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
