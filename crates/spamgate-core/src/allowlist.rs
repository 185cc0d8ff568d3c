//! Networks whose connections bypass classification.
//!
//! The list is built once from configuration text such as
//! `192.168.12.5,10.0.0.0/8 172.16.0.0/255.255.0.0` and never changes
//! afterwards, so it can be shared freely between connections.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One network entry, stored pre-masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// IPv4 network and mask.
    V4 {
        /// Network address with host bits cleared.
        network: u32,
        /// Netmask.
        mask: u32,
    },
    /// IPv6 network and mask.
    V6 {
        /// Network address with host bits cleared.
        network: u128,
        /// Netmask.
        mask: u128,
    },
}

impl Network {
    /// Parses `addr`, `addr/bits` or `addr/dotted-mask`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address or the mask cannot be parsed.
    pub fn parse(entry: &str) -> Result<Self> {
        let (addr, mask) = match entry.split_once('/') {
            Some((addr, mask)) => (addr, Some(mask)),
            None => (entry, None),
        };

        let addr: IpAddr = addr
            .parse()
            .map_err(|_| Error::invalid_network(entry, "bad address"))?;

        match addr {
            IpAddr::V4(v4) => {
                let mask = match mask {
                    None => u32::MAX,
                    Some(m) if m.contains('.') => m
                        .parse::<Ipv4Addr>()
                        .map(u32::from)
                        .map_err(|_| Error::invalid_network(entry, "bad netmask"))?,
                    Some(m) => prefix_mask_v4(parse_bits(entry, m, 32)?),
                };
                Ok(Self::V4 {
                    network: u32::from(v4) & mask,
                    mask,
                })
            }
            IpAddr::V6(v6) => {
                let mask = match mask {
                    None => u128::MAX,
                    Some(m) => prefix_mask_v6(parse_bits(entry, m, 128)?),
                };
                Ok(Self::V6 {
                    network: u128::from(v6) & mask,
                    mask,
                })
            }
        }
    }

    /// Returns true if `ip` lies inside this network.
    ///
    /// IPv4-mapped IPv6 addresses are matched against IPv4 entries.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (*self, ip) {
            (Self::V4 { network, mask }, IpAddr::V4(ip)) => u32::from(ip) & mask == network,
            (Self::V4 { network, mask }, IpAddr::V6(ip)) => ip
                .to_ipv4_mapped()
                .is_some_and(|ip| u32::from(ip) & mask == network),
            (Self::V6 { network, mask }, IpAddr::V6(ip)) => u128::from(ip) & mask == network,
            (Self::V6 { .. }, IpAddr::V4(_)) => false,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V4 { network, mask } => {
                write!(f, "{}/{}", Ipv4Addr::from(network), Ipv4Addr::from(mask))
            }
            Self::V6 { network, mask } => {
                write!(f, "{}/{}", Ipv6Addr::from(network), mask.count_ones())
            }
        }
    }
}

fn parse_bits(entry: &str, bits: &str, max: u32) -> Result<u32> {
    bits.parse::<u32>()
        .ok()
        .filter(|&b| b <= max)
        .ok_or_else(|| Error::invalid_network(entry, "bad CIDR value"))
}

fn prefix_mask_v4(bits: u32) -> u32 {
    u32::MAX.checked_shl(32 - bits).unwrap_or(0)
}

fn prefix_mask_v6(bits: u32) -> u128 {
    u128::MAX.checked_shl(128 - bits).unwrap_or(0)
}

/// Ordered, immutable list of ignored networks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct NetworkAllowlist {
    networks: Vec<Network>,
}

impl NetworkAllowlist {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma and/or space delimited list of networks.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first entry that cannot be parsed.
    pub fn parse(text: &str) -> Result<Self> {
        let mut list = Self::new();
        list.extend_from_text(text)?;
        Ok(list)
    }

    /// Appends the networks listed in `text`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first entry that cannot be parsed.
    pub fn extend_from_text(&mut self, text: &str) -> Result<()> {
        for entry in text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|e| !e.is_empty())
        {
            let network = Network::parse(entry)?;
            tracing::debug!(%network, "adding to network list");
            self.networks.push(network);
        }
        Ok(())
    }

    /// Returns true if `ip` matches any entry.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        let hit = self.networks.iter().find(|n| n.contains(ip));
        match hit {
            Some(network) => tracing::debug!(%ip, %network, "network list hit"),
            None => tracing::trace!(%ip, entries = self.networks.len(), "network list miss"),
        }
        hit.is_some()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Returns true if the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Iterates over the entries in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter()
    }
}

impl TryFrom<Vec<String>> for NetworkAllowlist {
    type Error = Error;

    fn try_from(entries: Vec<String>) -> Result<Self> {
        let mut list = Self::new();
        for entry in &entries {
            list.extend_from_text(entry)?;
        }
        Ok(list)
    }
}

impl From<NetworkAllowlist> for Vec<String> {
    fn from(list: NetworkAllowlist) -> Self {
        list.networks.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_match() {
        let list = NetworkAllowlist::parse("10.0.0.0/8").unwrap();
        assert!(list.contains(ip("10.1.2.3")));
        assert!(!list.contains(ip("11.1.2.3")));

        let list = NetworkAllowlist::parse("192.168.0.0/16").unwrap();
        assert!(!list.contains(ip("10.1.2.3")));
    }

    #[test]
    fn test_dotted_mask_equals_cidr() {
        let cidr = NetworkAllowlist::parse("172.16.0.0/12").unwrap();
        let dotted = NetworkAllowlist::parse("172.16.0.0/255.240.0.0").unwrap();
        assert_eq!(cidr, dotted);
        for addr in ["172.16.0.1", "172.31.255.255", "172.32.0.0", "10.0.0.1"] {
            assert_eq!(cidr.contains(ip(addr)), dotted.contains(ip(addr)));
        }
    }

    #[test]
    fn test_host_entry() {
        let list = NetworkAllowlist::parse("192.168.12.5").unwrap();
        assert!(list.contains(ip("192.168.12.5")));
        assert!(!list.contains(ip("192.168.12.6")));
    }

    #[test]
    fn test_network_is_premasked() {
        let list = NetworkAllowlist::parse("10.9.9.9/8").unwrap();
        assert!(list.contains(ip("10.0.0.1")));
        assert_eq!(list.iter().next().unwrap().to_string(), "10.0.0.0/255.0.0.0");
    }

    #[test]
    fn test_mixed_delimiters() {
        let list = NetworkAllowlist::parse("127.0.0.1, 10.0.0.0/8 192.168.0.0/255.255.0.0").unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.contains(ip("192.168.4.4")));
    }

    #[test]
    fn test_zero_and_full_prefix() {
        let any = NetworkAllowlist::parse("0.0.0.0/0").unwrap();
        assert!(any.contains(ip("203.0.113.9")));
        let host = NetworkAllowlist::parse("203.0.113.9/32").unwrap();
        assert!(host.contains(ip("203.0.113.9")));
        assert!(!host.contains(ip("203.0.113.8")));
    }

    #[test]
    fn test_ipv6() {
        let list = NetworkAllowlist::parse("2001:db8::/32").unwrap();
        assert!(list.contains(ip("2001:db8:1::7")));
        assert!(!list.contains(ip("2001:db9::1")));
        assert!(!list.contains(ip("10.0.0.1")));
    }

    #[test]
    fn test_ipv4_mapped_peer() {
        let list = NetworkAllowlist::parse("10.0.0.0/8").unwrap();
        assert!(list.contains(ip("::ffff:10.1.2.3")));
    }

    #[test]
    fn test_invalid_entries() {
        assert!(NetworkAllowlist::parse("10.0.0.0/33").is_err());
        assert!(NetworkAllowlist::parse("10.0.0.0/abc").is_err());
        assert!(NetworkAllowlist::parse("10.0.0.0/255.0.0").is_err());
        assert!(NetworkAllowlist::parse("not-an-ip").is_err());
        assert!(NetworkAllowlist::parse("::1/129").is_err());
    }

    #[test]
    fn test_empty_list() {
        let list = NetworkAllowlist::parse(" , ").unwrap();
        assert!(list.is_empty());
        assert!(!list.contains(ip("127.0.0.1")));
    }

    #[test]
    fn test_serde_roundtrip() {
        let list = NetworkAllowlist::parse("10.0.0.0/8,2001:db8::/32").unwrap();
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"["10.0.0.0/255.0.0.0","2001:db8::/32"]"#);
        let back: NetworkAllowlist = serde_json::from_str(&json).unwrap();
        assert_eq!(back, list);
    }

    proptest! {
        #[test]
        fn prop_cidr_and_dotted_agree(a in any::<u32>(), bits in 0u32..=32, probe in any::<u32>()) {
            let net = Ipv4Addr::from(a);
            let mask = Ipv4Addr::from(prefix_mask_v4(bits));
            let cidr = Network::parse(&format!("{net}/{bits}")).unwrap();
            let dotted = Network::parse(&format!("{net}/{mask}")).unwrap();
            prop_assert_eq!(cidr, dotted);
            let probe = IpAddr::V4(Ipv4Addr::from(probe));
            prop_assert_eq!(cidr.contains(probe), dotted.contains(probe));
        }

        #[test]
        fn prop_network_contains_itself(a in any::<u32>(), bits in 0u32..=32) {
            let net = Ipv4Addr::from(a);
            let entry = Network::parse(&format!("{net}/{bits}")).unwrap();
            prop_assert!(entry.contains(IpAddr::V4(net)));
        }
    }
}
