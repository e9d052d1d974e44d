//! Parsed AWS prefix feed and the selection filter that runs against it.
//!
//! The feed (`ip-ranges.json`) is several megabytes of JSON, of which only the
//! `prefixes` and `ipv6_prefixes` arrays matter. [`PrefixSet::parse`] walks the
//! document with a serde visitor and handles one array element at a time, so
//! no intermediate `serde_json::Value` tree is ever built.
//!
//! A [`PrefixSet`] is an immutable snapshot. The selection cache lives inside
//! it, so a new feed always starts with a cold cache and readers holding an
//! older snapshot keep getting results consistent with that snapshot.

use ipnet::IpNet;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

/// Matches any region or any service
pub const WILDCARD: &str = "*";

/// One upstream-advertised network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prefix {
    pub network: IpNet,
    pub is_v6: bool,
    pub region: String,
    pub service: String,
}

/// A `<region>:<service>` selection entry; either side may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    region: String,
    service: String,
}

impl Selector {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether `prefix` is selected.
    ///
    /// Evaluates `(region_match && service == "*") || service == prefix.service`:
    /// an exact service name selects that service in every region, whatever
    /// the region half says. Persisted selections depend on this grouping.
    pub fn matches(&self, prefix: &Prefix) -> bool {
        let region_match = self.region == WILDCARD || self.region == prefix.region;
        (region_match && self.service == WILDCARD) || self.service == prefix.service
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((region, service)) if !region.is_empty() && !service.is_empty() => {
                Ok(Self::new(region, service))
            }
            _ => Err(Error::InvalidSelector(s.to_string())),
        }
    }
}

impl TryFrom<String> for Selector {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.region, self.service)
    }
}

/// Last selector list seen by [`PrefixSet::filter`] and what it produced
#[derive(Debug)]
struct FilterCache {
    selectors: Option<Vec<Selector>>,
    result: Arc<[Prefix]>,
}

impl Default for FilterCache {
    fn default() -> Self {
        Self {
            selectors: None,
            result: Arc::from(Vec::new()),
        }
    }
}

/// All prefixes from one feed plus the region/service indices derived from them
#[derive(Debug, Default)]
pub struct PrefixSet {
    prefixes: Vec<Prefix>,
    region_to_services: BTreeMap<String, Vec<String>>,
    service_to_regions: BTreeMap<String, Vec<String>>,
    cache: Mutex<FilterCache>,
}

impl PrefixSet {
    /// Parse an `ip-ranges.json` document.
    ///
    /// Only `prefixes` is read, plus `ipv6_prefixes` when `accept_ipv6` is
    /// set. A malformed document or CIDR fails the whole parse. Whatever is
    /// left in `reader` after the document is drained, so a tee'd or shared
    /// stream always reaches EOF.
    pub fn parse<R: Read>(accept_ipv6: bool, mut reader: R) -> Result<Self> {
        let mut builder = IndexBuilder::default();
        {
            let mut de = serde_json::Deserializer::from_reader(&mut reader);
            FeedSeed {
                accept_ipv6,
                builder: &mut builder,
            }
            .deserialize(&mut de)
            .map_err(|e| Error::FeedParse(e.to_string()))?;
            de.end().map_err(|e| Error::FeedParse(e.to_string()))?;
        }

        io::copy(&mut reader, &mut io::sink())
            .map_err(|e| Error::FeedParse(format!("failed to drain feed: {}", e)))?;

        Ok(builder.finish())
    }

    /// Build a set directly from prefix records
    pub fn from_prefixes(prefixes: impl IntoIterator<Item = Prefix>) -> Self {
        let mut builder = IndexBuilder::default();
        for prefix in prefixes {
            builder.push(prefix);
        }
        builder.finish()
    }

    pub fn prefixes(&self) -> &[Prefix] {
        &self.prefixes
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Region → sorted, deduplicated services advertised there
    pub fn region_to_services(&self) -> &BTreeMap<String, Vec<String>> {
        &self.region_to_services
    }

    /// Service → sorted, deduplicated regions it is advertised in
    pub fn service_to_regions(&self) -> &BTreeMap<String, Vec<String>> {
        &self.service_to_regions
    }

    /// Prefixes selected by `selectors`.
    ///
    /// Calls are serialized. When `selectors` is element-wise equal to the
    /// previous call's list, the previous result is returned as-is.
    /// Each prefix record appears at most once, in first-match order.
    pub fn filter(&self, selectors: &[Selector]) -> Arc<[Prefix]> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.selectors.as_deref() == Some(selectors) {
            return Arc::clone(&cache.result);
        }

        let mut taken = vec![false; self.prefixes.len()];
        let mut matched = Vec::new();
        for selector in selectors {
            for (idx, prefix) in self.prefixes.iter().enumerate() {
                if !taken[idx] && selector.matches(prefix) {
                    taken[idx] = true;
                    matched.push(prefix.clone());
                }
            }
        }

        let result: Arc<[Prefix]> = Arc::from(matched);
        cache.selectors = Some(selectors.to_vec());
        cache.result = Arc::clone(&result);
        result
    }
}

// Two sets are equal when they hold the same feed; cache state is ignored.
impl PartialEq for PrefixSet {
    fn eq(&self, other: &Self) -> bool {
        self.prefixes == other.prefixes
            && self.region_to_services == other.region_to_services
            && self.service_to_regions == other.service_to_regions
    }
}

#[derive(Default)]
struct IndexBuilder {
    prefixes: Vec<Prefix>,
    region_to_services: BTreeMap<String, Vec<String>>,
    service_to_regions: BTreeMap<String, Vec<String>>,
}

impl IndexBuilder {
    fn push(&mut self, prefix: Prefix) {
        self.region_to_services
            .entry(prefix.region.clone())
            .or_default()
            .push(prefix.service.clone());
        self.service_to_regions
            .entry(prefix.service.clone())
            .or_default()
            .push(prefix.region.clone());
        self.prefixes.push(prefix);
    }

    fn finish(mut self) -> PrefixSet {
        for bucket in self
            .region_to_services
            .values_mut()
            .chain(self.service_to_regions.values_mut())
        {
            bucket.sort();
            bucket.dedup();
        }

        PrefixSet {
            prefixes: self.prefixes,
            region_to_services: self.region_to_services,
            service_to_regions: self.service_to_regions,
            cache: Mutex::default(),
        }
    }
}

/// One element of `prefixes` / `ipv6_prefixes`; other fields are skipped.
#[derive(Deserialize)]
struct RawPrefix {
    ip_prefix: Option<String>,
    ipv6_prefix: Option<String>,
    #[serde(default)]
    region: String,
    #[serde(default)]
    service: String,
}

impl RawPrefix {
    fn into_prefix(self) -> std::result::Result<Prefix, String> {
        let (cidr, is_v6) = match (self.ipv6_prefix, self.ip_prefix) {
            (Some(cidr), _) => (cidr, true),
            (None, Some(cidr)) => (cidr, false),
            (None, None) => return Err("prefix entry without ip_prefix or ipv6_prefix".into()),
        };
        let network = cidr
            .parse::<IpNet>()
            .map_err(|e| format!("invalid CIDR address: {} ({})", cidr, e))?
            .trunc();

        Ok(Prefix {
            network,
            is_v6,
            region: self.region,
            service: self.service,
        })
    }
}

/// Walks the top-level object and hands the interesting arrays to [`PrefixArray`]
struct FeedSeed<'a> {
    accept_ipv6: bool,
    builder: &'a mut IndexBuilder,
}

impl<'de> DeserializeSeed<'de> for FeedSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for FeedSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an ip-ranges.json object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "prefixes" => map.next_value_seed(PrefixArray {
                    builder: &mut *self.builder,
                })?,
                "ipv6_prefixes" if self.accept_ipv6 => map.next_value_seed(PrefixArray {
                    builder: &mut *self.builder,
                })?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

struct PrefixArray<'a> {
    builder: &'a mut IndexBuilder,
}

impl<'de> DeserializeSeed<'de> for PrefixArray<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for PrefixArray<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of prefix objects")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        while let Some(raw) = seq.next_element::<RawPrefix>()? {
            let prefix = raw.into_prefix().map_err(de::Error::custom)?;
            self.builder.push(prefix);
        }
        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn prefix_strategy() -> impl Strategy<Value = Prefix> {
        (
            (0u8..=255, 0u8..=255, 0u8..=32),
            prop::sample::select(vec!["us-east-1", "eu-west-1", "ap-south-1"]),
            prop::sample::select(vec!["AMAZON", "EC2", "S3"]),
        )
            .prop_map(|((a, b, len), region, service)| {
                let network: IpNet = format!("{}.{}.0.0/{}", a, b, len).parse().unwrap();
                Prefix {
                    network: network.trunc(),
                    is_v6: false,
                    region: region.to_string(),
                    service: service.to_string(),
                }
            })
    }

    fn selector_strategy() -> impl Strategy<Value = Selector> {
        (
            prop::sample::select(vec!["*", "us-east-1", "eu-west-1", "nowhere"]),
            prop::sample::select(vec!["*", "AMAZON", "EC2", "S3"]),
        )
            .prop_map(|(r, s)| Selector::new(r, s))
    }

    proptest! {
        /// Filter never returns more records than the set holds
        #[test]
        fn prop_filter_bounded(
            prefixes in prop::collection::vec(prefix_strategy(), 0..40),
            sels in prop::collection::vec(selector_strategy(), 0..6)
        ) {
            let set = PrefixSet::from_prefixes(prefixes);
            prop_assert!(set.filter(&sels).len() <= set.len());
        }

        /// Every returned record satisfies at least one selector
        #[test]
        fn prop_filter_results_match(
            prefixes in prop::collection::vec(prefix_strategy(), 0..40),
            sels in prop::collection::vec(selector_strategy(), 0..6)
        ) {
            let set = PrefixSet::from_prefixes(prefixes);
            for p in set.filter(&sels).iter() {
                prop_assert!(sels.iter().any(|s| s.matches(p)));
            }
        }

        /// Index buckets are sorted and free of duplicates
        #[test]
        fn prop_index_sorted_unique(prefixes in prop::collection::vec(prefix_strategy(), 0..40)) {
            let set = PrefixSet::from_prefixes(prefixes);
            for bucket in set.region_to_services().values().chain(set.service_to_regions().values()) {
                prop_assert!(bucket.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
