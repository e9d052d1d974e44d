//! Desired route set: custom ranges merged with the selected feed prefixes.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::Error;
use crate::prefixes::Prefix;

/// An operator-supplied network routed alongside the feed prefixes.
///
/// Accepts CIDR notation or a bare address (stored as /32 or /128); host
/// bits are cleared so `10.1.2.3/8` and `10.0.0.0/8` are the same range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CustomRange(IpNet);

impl CustomRange {
    pub fn new(network: IpNet) -> Self {
        Self(network.trunc())
    }

    pub fn network(&self) -> IpNet {
        self.0
    }
}

impl FromStr for CustomRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let network = if s.contains('/') {
            s.parse::<IpNet>()
                .map_err(|_| Error::InvalidNetwork(format!("invalid CIDR: {}", s)))?
        } else {
            let ip: IpAddr = s
                .parse()
                .map_err(|_| Error::InvalidNetwork(format!("invalid IP address: {}", s)))?;
            IpNet::from(ip)
        };
        Ok(Self::new(network))
    }
}

impl TryFrom<String> for CustomRange {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<CustomRange> for String {
    fn from(range: CustomRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for CustomRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Canonical textual form of a network, used for ordering and identity.
pub fn canonical(network: &IpNet) -> String {
    network.to_string()
}

/// Build the route set the table should converge to.
///
/// Custom ranges come first, then the filtered prefixes; duplicates (by
/// canonical string) are dropped and the result is sorted by canonical
/// string. The same inputs in any order give the same output, which the
/// reconciler's binary search relies on.
pub fn desired_routes(customs: &[CustomRange], filtered: &[Prefix]) -> Vec<IpNet> {
    let mut seen = HashSet::with_capacity(customs.len() + filtered.len());
    let mut keyed: Vec<(String, IpNet)> = customs
        .iter()
        .map(CustomRange::network)
        .chain(filtered.iter().map(|p| p.network))
        .filter_map(|net| {
            let key = canonical(&net);
            seen.insert(key.clone()).then_some((key, net))
        })
        .collect();

    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, net)| net).collect()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn network_strategy() -> impl Strategy<Value = IpNet> {
        (0u8..=255, 0u8..=255, 0u8..=255, 8u8..=32).prop_map(|(a, b, c, len)| {
            format!("{}.{}.{}.0/{}", a, b, c, len)
                .parse::<IpNet>()
                .unwrap()
                .trunc()
        })
    }

    fn as_prefix(network: IpNet) -> Prefix {
        Prefix {
            network,
            is_v6: false,
            region: "r".to_string(),
            service: "s".to_string(),
        }
    }

    proptest! {
        /// Any permutation of the inputs yields the identical sequence
        #[test]
        fn prop_order_independent(
            customs in prop::collection::vec(network_strategy(), 0..20),
            filtered in prop::collection::vec(network_strategy(), 0..40),
            seed in any::<u64>()
        ) {
            let customs_a: Vec<CustomRange> = customs.iter().copied().map(CustomRange::new).collect();
            let filtered_a: Vec<Prefix> = filtered.iter().copied().map(as_prefix).collect();

            // Deterministic shuffle driven by the seed, with duplicates appended
            let mut customs_b = customs_a.clone();
            let mut filtered_b = filtered_a.clone();
            let n = customs_b.len().max(1) as u64;
            customs_b.rotate_left((seed % n) as usize);
            customs_b.reverse();
            filtered_b.reverse();
            if let Some(first) = filtered_a.first() {
                filtered_b.push(first.clone());
            }
            if let Some(first) = customs_a.first() {
                customs_b.push(*first);
            }

            prop_assert_eq!(
                desired_routes(&customs_a, &filtered_a),
                desired_routes(&customs_b, &filtered_b)
            );
        }

        /// Output is strictly increasing by canonical string
        #[test]
        fn prop_sorted_unique(
            customs in prop::collection::vec(network_strategy(), 0..20),
            filtered in prop::collection::vec(network_strategy(), 0..40)
        ) {
            let customs: Vec<CustomRange> = customs.into_iter().map(CustomRange::new).collect();
            let filtered: Vec<Prefix> = filtered.into_iter().map(as_prefix).collect();
            let routes = desired_routes(&customs, &filtered);
            prop_assert!(routes.windows(2).all(|w| canonical(&w[0]) < canonical(&w[1])));
        }

        /// Swapping where a network comes from does not change the result
        #[test]
        fn prop_source_independent(nets in prop::collection::vec(network_strategy(), 0..30)) {
            let as_customs: Vec<CustomRange> = nets.iter().copied().map(CustomRange::new).collect();
            let as_filtered: Vec<Prefix> = nets.iter().copied().map(as_prefix).collect();
            prop_assert_eq!(
                desired_routes(&as_customs, &[]),
                desired_routes(&[], &as_filtered)
            );
        }
    }
}
