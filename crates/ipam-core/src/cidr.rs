//! CIDR and address primitives
//!
//! [`Cidr`] wraps an `ipnetwork::IpNetwork` and is used both for networks
//! (`10.0.0.0/24`) and for host addresses carrying a mask (`10.0.0.5/24`).
//! [`AddressSpan`] is the numeric interval view used for range arithmetic.
//!
//! All numeric work is done on `u128` so IPv6 blocks never overflow: the size
//! of `2001:db8::/32` is exactly 2^96.

use crate::error::IpamError;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// IP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Address family number (4 or 6)
    #[must_use]
    pub fn family(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    /// Number of bits in an address of this version
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Version of an address
    #[must_use]
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPv{}", self.family())
    }
}

/// Numeric value of an address
#[must_use]
pub fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Address for a numeric value, `None` if the value does not fit the version
#[must_use]
pub fn ip_from_u128(version: IpVersion, value: u128) -> Option<IpAddr> {
    match version {
        IpVersion::V4 => u32::try_from(value)
            .ok()
            .map(|v| IpAddr::V4(Ipv4Addr::from(v))),
        IpVersion::V6 => Some(IpAddr::V6(Ipv6Addr::from(value))),
    }
}

/// An IPv4 or IPv6 address with a prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr(IpNetwork);

impl Cidr {
    /// Parse `address` or `address/prefixlen` text.
    ///
    /// A bare address gets the full host mask (/32 or /128).
    pub fn parse(text: &str) -> Result<Self, IpamError> {
        let text = text.trim();
        let (addr, len) = match text.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (text, None),
        };

        let ip: IpAddr = addr
            .parse()
            .map_err(|_| IpamError::InvalidFormat(format!("'{}' is not an IP address", text)))?;

        let prefix = match len {
            Some(len) => len.parse::<u8>().map_err(|_| {
                IpamError::InvalidFormat(format!("'{}' has a malformed prefix length", text))
            })?,
            None => IpVersion::of(ip).bits(),
        };

        Self::new(ip, prefix)
    }

    /// Build from an address and prefix length
    pub fn new(ip: IpAddr, prefix: u8) -> Result<Self, IpamError> {
        IpNetwork::new(ip, prefix).map(Cidr).map_err(|_| {
            IpamError::InvalidPrefix(format!(
                "/{} is not a valid {} prefix length",
                prefix,
                IpVersion::of(ip)
            ))
        })
    }

    /// Host address with the full host mask
    #[must_use]
    pub fn host(ip: IpAddr) -> Self {
        Cidr(IpNetwork::from(ip))
    }

    /// The address part (may carry host bits)
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    /// The network address (host bits cleared)
    #[must_use]
    pub fn network(&self) -> IpAddr {
        self.0.network()
    }

    /// Prefix length
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.0.prefix()
    }

    /// IP version
    #[must_use]
    pub fn version(&self) -> IpVersion {
        IpVersion::of(self.ip())
    }

    /// True when the address has no host bits set
    #[must_use]
    pub fn is_network(&self) -> bool {
        self.ip() == self.network()
    }

    /// Same prefix with host bits cleared
    #[must_use]
    pub fn trunc(&self) -> Cidr {
        Cidr::new(self.network(), self.prefix_len()).unwrap_or(*self)
    }

    /// Same address with a different prefix length
    pub fn with_prefix_len(&self, prefix: u8) -> Result<Cidr, IpamError> {
        Cidr::new(self.ip(), prefix)
    }

    /// True iff this network wholly contains `other`.
    ///
    /// Both must be the same version, `self` must be no more specific than
    /// `other`, and `other`'s network portion must match after masking.
    #[must_use]
    pub fn contains(&self, other: &Cidr) -> bool {
        self.version() == other.version()
            && self.prefix_len() <= other.prefix_len()
            && self.0.contains(other.network())
    }

    /// True iff `ip` lies inside this network
    #[must_use]
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.version() == IpVersion::of(ip) && self.0.contains(ip)
    }

    /// True iff the two networks share at least one address
    #[must_use]
    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.span().intersects(&other.span())
    }

    /// True for IPv4 blocks whose first and last address are network and broadcast
    #[must_use]
    pub fn has_reserved_edges(&self) -> bool {
        self.version() == IpVersion::V4 && self.prefix_len() <= 30
    }

    /// Numeric interval covered by the network
    #[must_use]
    pub fn span(&self) -> AddressSpan {
        let version = self.version();
        let first = ip_to_u128(self.network());
        let host_bits = u32::from(version.bits() - self.prefix_len());
        let last = if host_bits >= 128 {
            u128::MAX
        } else {
            first | ((1u128 << host_bits) - 1)
        };
        AddressSpan {
            version,
            first,
            last,
        }
    }

    /// Number of addresses in the network.
    ///
    /// Saturates at `u128::MAX` for `::/0`, the only network whose size does not
    /// fit; the store refuses to manage that block.
    #[must_use]
    pub fn size(&self) -> u128 {
        self.span().size()
    }
}

impl Ord for Cidr {
    fn cmp(&self, other: &Self) -> Ordering {
        // IpAddr orders IPv4 before IPv6, then numerically
        self.ip()
            .cmp(&other.ip())
            .then_with(|| self.prefix_len().cmp(&other.prefix_len()))
    }
}

impl PartialOrd for Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip(), self.prefix_len())
    }
}

impl FromStr for Cidr {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cidr::parse(s)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Cidr::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Inclusive numeric interval of addresses of one version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpan {
    version: IpVersion,
    first: u128,
    last: u128,
}

impl AddressSpan {
    /// Span from `start` to `end` inclusive
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self, IpamError> {
        let version = IpVersion::of(start);
        if version != IpVersion::of(end) {
            return Err(IpamError::InvalidRange(format!(
                "{} and {} are different IP versions",
                start, end
            )));
        }
        let first = ip_to_u128(start);
        let last = ip_to_u128(end);
        if first > last {
            return Err(IpamError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self {
            version,
            first,
            last,
        })
    }

    /// IP version of the span
    #[must_use]
    pub fn version(&self) -> IpVersion {
        self.version
    }

    /// First numeric value
    #[must_use]
    pub fn first(&self) -> u128 {
        self.first
    }

    /// Last numeric value
    #[must_use]
    pub fn last(&self) -> u128 {
        self.last
    }

    /// Number of addresses, `last - first + 1` (saturating for the full IPv6 space)
    #[must_use]
    pub fn size(&self) -> u128 {
        (self.last - self.first).saturating_add(1)
    }

    /// True iff `value` of the given family lies in the span
    #[must_use]
    pub fn contains_value(&self, version: IpVersion, value: u128) -> bool {
        self.version == version && self.first <= value && value <= self.last
    }

    /// True iff `ip` lies in the span
    #[must_use]
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.contains_value(IpVersion::of(ip), ip_to_u128(ip))
    }

    /// True iff every address of `other` is in `self`
    #[must_use]
    pub fn contains(&self, other: &AddressSpan) -> bool {
        self.version == other.version && self.first <= other.first && other.last <= self.last
    }

    /// True iff the spans share at least one address
    #[must_use]
    pub fn intersects(&self, other: &AddressSpan) -> bool {
        self.version == other.version && self.first <= other.last && other.first <= self.last
    }
}

impl fmt::Display for AddressSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (
            ip_from_u128(self.version, self.first),
            ip_from_u128(self.version, self.last),
        ) {
            (Some(first), Some(last)) => write!(f, "{}-{}", first, last),
            _ => write!(f, "{}:{}-{}", self.version, self.first, self.last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(text: &str) -> Cidr {
        Cidr::parse(text).unwrap()
    }

    /// Every IPv4 network inside 10.0.0.0/28 with length /28 to /32
    fn small_networks() -> Vec<Cidr> {
        let mut out = Vec::new();
        for len in 28u8..=32 {
            let step = 1u32 << (32 - len);
            let mut offset = 0u32;
            while offset < 16 {
                let ip = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + offset));
                out.push(Cidr::new(ip, len).unwrap());
                offset += step;
            }
        }
        out
    }

    #[test]
    fn test_parse_network_and_host() {
        let net = cidr("192.168.1.0/24");
        assert_eq!(net.prefix_len(), 24);
        assert!(net.is_network());
        assert_eq!(net.to_string(), "192.168.1.0/24");

        let host = cidr("192.168.1.7");
        assert_eq!(host.prefix_len(), 32);
        assert_eq!(cidr("2001:db8::1").prefix_len(), 128);

        let iface = cidr("192.168.1.7/24");
        assert!(!iface.is_network());
        assert_eq!(iface.trunc(), net);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Cidr::parse("not-an-ip"), Err(IpamError::InvalidFormat(_))));
        assert!(matches!(Cidr::parse("10.0.0.0/x"), Err(IpamError::InvalidFormat(_))));
        assert!(matches!(Cidr::parse("10.0.0.0/33"), Err(IpamError::InvalidPrefix(_))));
        assert!(matches!(Cidr::parse("2001:db8::/129"), Err(IpamError::InvalidPrefix(_))));
    }

    #[test]
    fn test_contains_matches_brute_force_enumeration() {
        let nets = small_networks();
        for a in &nets {
            for b in &nets {
                let sa = a.span();
                let sb = b.span();
                let every_address_of_b_in_a =
                    (sb.first()..=sb.last()).all(|v| sa.contains_value(IpVersion::V4, v));
                assert_eq!(
                    a.contains(b),
                    every_address_of_b_in_a,
                    "contains({}, {}) disagrees with enumeration",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_contains_rejects_other_version() {
        assert!(!cidr("0.0.0.0/0").contains(&cidr("::1")));
        assert!(!cidr("::/1").contains(&cidr("10.0.0.1")));
        assert!(!cidr("10.0.0.0/8").contains_ip("::a00:1".parse().unwrap()));
    }

    #[test]
    fn test_overlaps_uses_intersection() {
        assert!(cidr("10.0.0.0/24").overlaps(&cidr("10.0.0.128/25")));
        assert!(!cidr("10.0.0.0/25").overlaps(&cidr("10.0.0.128/25")));

        let a = AddressSpan::new("10.0.0.10".parse().unwrap(), "10.0.0.20".parse().unwrap()).unwrap();
        let b = AddressSpan::new("10.0.0.20".parse().unwrap(), "10.0.0.30".parse().unwrap()).unwrap();
        let c = AddressSpan::new("10.0.0.21".parse().unwrap(), "10.0.0.30".parse().unwrap()).unwrap();
        assert!(a.intersects(&b));
        assert!(!a.contains(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_ordering_ipv4_before_ipv6() {
        let mut list = vec![
            cidr("2001:db8::/32"),
            cidr("10.0.0.0/24"),
            cidr("10.0.0.0/8"),
            cidr("9.255.255.255/32"),
        ];
        list.sort();
        let rendered: Vec<String> = list.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["9.255.255.255/32", "10.0.0.0/8", "10.0.0.0/24", "2001:db8::/32"]
        );
    }

    #[test]
    fn test_size_uses_128_bit_arithmetic() {
        assert_eq!(cidr("10.0.0.0/24").size(), 256);
        assert_eq!(cidr("0.0.0.0/0").size(), 1u128 << 32);
        assert_eq!(cidr("2001:db8::/32").size(), 1u128 << 96);
        assert_eq!(cidr("2001:db8::1").size(), 1);
        assert_eq!(cidr("::/0").size(), u128::MAX);
    }

    #[test]
    fn test_span_rejects_mixed_versions_and_reversed_bounds() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        let lower: IpAddr = "10.0.0.0".parse().unwrap();
        assert!(matches!(AddressSpan::new(v4, v6), Err(IpamError::InvalidRange(_))));
        assert!(matches!(AddressSpan::new(v4, lower), Err(IpamError::InvalidRange(_))));
        assert_eq!(AddressSpan::new(lower, v4).unwrap().size(), 2);
    }

    #[test]
    fn test_reserved_edges_only_for_short_ipv4() {
        assert!(cidr("10.0.0.0/30").has_reserved_edges());
        assert!(!cidr("10.0.0.0/31").has_reserved_edges());
        assert!(!cidr("2001:db8::/64").has_reserved_edges());
    }

    #[test]
    fn test_serde_as_string() {
        let net = cidr("172.16.0.0/12");
        let json = serde_json::to_string(&net).unwrap();
        assert_eq!(json, "\"172.16.0.0/12\"");
        let back: Cidr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, net);
        assert!(serde_json::from_str::<Cidr>("\"bogus\"").is_err());
    }
}
