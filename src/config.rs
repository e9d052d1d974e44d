//! Configuration management for awsrangeroute.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/awsrangeroute/config.yaml";

/// Published AWS prefix list
pub const DEFAULT_FEED_URL: &str = "https://ip-ranges.amazonaws.com/ip-ranges.json";

/// Kernel routing tables that must never be reconciled (unspec, default, main, local)
const RESERVED_TABLES: &[u32] = &[0, 253, 254, 255];

/// Interval validation (e.g., "4h", "30m", "1d", "90s").
/// Requires ASCII-only input to prevent Unicode-related edge cases
pub fn is_valid_interval(interval: &str) -> bool {
    parse_interval(interval).is_some()
}

/// Parse an interval string into a [`Duration`].
///
/// Returns `None` when the suffix is unknown, the number does not fit a
/// `u32`, or the value is zero.
pub fn parse_interval(interval: &str) -> Option<Duration> {
    if !interval.is_ascii() || interval.len() < 2 {
        return None;
    }

    let (num_part, suffix) = interval.split_at(interval.len() - 1);
    let value: u64 = num_part.parse::<u32>().ok()?.into();
    if value == 0 {
        return None;
    }

    let secs = match suffix {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Upstream prefix feed
    pub feed: FeedConfig,

    /// Directory holding the cached feed, selections and custom ranges
    pub store: PathBuf,

    /// Target routing table and gateway
    pub route: RouteConfig,

    /// Periodic re-fetch of the feed
    pub polling: PollingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            store: PathBuf::from("/var/lib/awsrangeroute"),
            route: RouteConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.feed.url.starts_with("https://") && !self.feed.url.starts_with("http://") {
            anyhow::bail!("Feed URL must use http or https: {}", self.feed.url);
        }

        if !is_valid_interval(&self.feed.timeout) {
            anyhow::bail!(
                "Invalid feed.timeout '{}'. Use format like '30s', '1m'",
                self.feed.timeout
            );
        }

        if !is_valid_interval(&self.polling.interval) {
            anyhow::bail!(
                "Invalid polling.interval '{}'. Use format like '4h', '30m', '1d'",
                self.polling.interval
            );
        }

        if RESERVED_TABLES.contains(&self.route.table) {
            anyhow::bail!(
                "Routing table {} is reserved by the kernel; pick a dedicated table ID",
                self.route.table
            );
        }

        if let Some(gw) = self.route.gateway {
            if !gw.is_ipv4() {
                anyhow::bail!("route.gateway must be an IPv4 address: {}", gw);
            }
        }
        if let Some(gw) = self.route.gateway_v6 {
            if !gw.is_ipv6() {
                anyhow::bail!("route.gateway_v6 must be an IPv6 address: {}", gw);
            }
        }

        if self.store.as_os_str().is_empty() {
            anyhow::bail!("store directory must not be empty");
        }

        Ok(())
    }

    /// Save configuration to YAML file atomically
    ///
    /// Uses tempfile + rename pattern to prevent corruption on crash.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        let parent_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", parent_dir))?;
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    /// Overall timeout for one feed download
    pub fn fetch_timeout(&self) -> Duration {
        parse_interval(&self.feed.timeout).unwrap_or(Duration::from_secs(60))
    }

    /// Polling period, or `None` when polling is disabled
    pub fn polling_interval(&self) -> Option<Duration> {
        if self.polling.enabled {
            parse_interval(&self.polling.interval)
        } else {
            None
        }
    }

    /// Generate a commented default config
    pub fn generate_default_yaml() -> String {
        format!(
            "\
# awsrangeroute configuration

feed:
  # Upstream prefix list
  url: \"{DEFAULT_FEED_URL}\"
  # Overall download timeout
  timeout: \"1m\"
  # Also route ipv6_prefixes
  ipv6: false

# Cached feed, selections.json and customs.json live here
store: /var/lib/awsrangeroute

route:
  # Dedicated policy routing table (never main/local/default)
  table: 100
  # Next hop for IPv4 routes; omit (or 0.0.0.0) to use the host's default gateway
  # gateway: 192.168.0.1
  # Next hop for IPv6 routes; omit (or ::) to use the host's default gateway
  # gateway_v6: \"fe80::1\"
  # auto, iproute or memory
  backend: auto

polling:
  enabled: true
  interval: \"1h\"
"
        )
    }
}

/// Upstream feed settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
    /// Overall fetch timeout (e.g. "60s", "1m")
    pub timeout: String,
    /// Include the `ipv6_prefixes` array
    pub ipv6: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            timeout: "1m".to_string(),
            ipv6: false,
        }
    }
}

/// Routing table settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouteConfig {
    pub table: u32,
    /// IPv4 next hop; the host default gateway is used when unset or 0.0.0.0
    pub gateway: Option<IpAddr>,
    /// IPv6 next hop; the host default gateway is used when unset or ::
    pub gateway_v6: Option<IpAddr>,
    pub backend: RouteBackend,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            table: 100,
            gateway: None,
            gateway_v6: None,
            backend: RouteBackend::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteBackend {
    /// Kernel table on Linux, simulated table elsewhere
    #[default]
    Auto,
    /// Drive the kernel table through iproute2
    Iproute,
    /// In-memory simulated table (no kernel access)
    Memory,
}

/// Polling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub enabled: bool,
    pub interval: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: "1h".to_string(),
        }
    }
}
