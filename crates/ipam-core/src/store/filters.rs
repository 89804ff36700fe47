//! List filters
//!
//! Filters accepted by the list operations: site, VRF, status and a
//! case-insensitive substring search. Unset fields match everything.

use crate::cidr::Cidr;
use crate::models::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which VRF table to look at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum VrfScope {
    /// The global table (no VRF)
    Global,
    /// One specific VRF
    Vrf(Uuid),
}

impl VrfScope {
    #[must_use]
    pub fn from_vrf_id(vrf_id: Option<Uuid>) -> Self {
        vrf_id.map_or(VrfScope::Global, VrfScope::Vrf)
    }

    #[must_use]
    pub fn vrf_id(self) -> Option<Uuid> {
        match self {
            VrfScope::Global => None,
            VrfScope::Vrf(id) => Some(id),
        }
    }

    #[must_use]
    pub fn matches(self, vrf_id: Option<Uuid>) -> bool {
        self.vrf_id() == vrf_id
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Prefix list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixFilter {
    pub site_id: Option<Uuid>,
    pub vrf: Option<VrfScope>,
    pub status: Option<PrefixStatus>,
    pub role_id: Option<Uuid>,
    pub is_pool: Option<bool>,
    /// Substring of the CIDR text or description
    pub search: Option<String>,
}

impl PrefixFilter {
    #[must_use]
    pub fn matches(&self, prefix: &Prefix) -> bool {
        self.site_id.is_none_or(|site| prefix.site_id == Some(site))
            && self.vrf.is_none_or(|vrf| vrf.matches(prefix.vrf_id))
            && self.status.is_none_or(|status| prefix.status == status)
            && self.role_id.is_none_or(|role| prefix.role_id == Some(role))
            && self.is_pool.is_none_or(|pool| prefix.is_pool == pool)
            && self.search.as_deref().is_none_or(|q| {
                contains_ci(&prefix.prefix.to_string(), q) || contains_ci(&prefix.description, q)
            })
    }
}

/// IP address list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressFilter {
    pub vrf: Option<VrfScope>,
    pub status: Option<IpAddressStatus>,
    pub state: Option<AllocationState>,
    /// Only addresses inside this network
    pub parent: Option<Cidr>,
    pub assigned_object: Option<AssignedObject>,
    /// Substring of the address, DNS name or MAC address
    pub search: Option<String>,
}

impl AddressFilter {
    #[must_use]
    pub fn matches(&self, ip: &IpAddress) -> bool {
        self.vrf.is_none_or(|vrf| vrf.matches(ip.vrf_id))
            && self.status.is_none_or(|status| ip.status == status)
            && self.state.is_none_or(|state| ip.state == state)
            && self.parent.is_none_or(|parent| parent.contains_ip(ip.host()))
            && self
                .assigned_object
                .is_none_or(|obj| ip.assigned_object == Some(obj))
            && self.search.as_deref().is_none_or(|q| {
                contains_ci(&ip.address.to_string(), q)
                    || contains_ci(&ip.dns_name, q)
                    || ip.mac_address.as_deref().is_some_and(|mac| contains_ci(mac, q))
            })
    }
}

/// IP range list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeFilter {
    pub site_id: Option<Uuid>,
    pub vrf: Option<VrfScope>,
    pub status: Option<IpAddressStatus>,
}

impl RangeFilter {
    #[must_use]
    pub fn matches(&self, range: &IpRange) -> bool {
        self.site_id.is_none_or(|site| range.site_id == Some(site))
            && self.vrf.is_none_or(|vrf| vrf.matches(range.vrf_id))
            && self.status.is_none_or(|status| range.status == status)
    }
}

/// VLAN list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VlanFilter {
    pub site_id: Option<Uuid>,
    pub status: Option<VlanStatus>,
    /// Substring of the VLAN name
    pub search: Option<String>,
}

impl VlanFilter {
    #[must_use]
    pub fn matches(&self, vlan: &Vlan) -> bool {
        self.site_id.is_none_or(|site| vlan.site_id == Some(site))
            && self.status.is_none_or(|status| vlan.status == status)
            && self.search.as_deref().is_none_or(|q| contains_ci(&vlan.name, q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn address(text: &str, dns_name: &str, mac: Option<&str>) -> IpAddress {
        IpAddress {
            id: Uuid::new_v4(),
            address: Cidr::parse(text).unwrap(),
            vrf_id: None,
            tenant_id: None,
            status: IpAddressStatus::Active,
            state: AllocationState::Assigned,
            role: None,
            dns_name: dns_name.to_string(),
            mac_address: mac.map(str::to_string),
            assigned_object: None,
            nat_inside: None,
            description: String::new(),
            created: Utc::now(),
            last_updated: Utc::now(),
            seq: 0,
        }
    }

    #[test]
    fn test_address_search_covers_address_hostname_and_mac() {
        let ip = address("10.1.2.3/24", "Web01.example.com", Some("AA:BB:CC:DD:EE:FF"));
        let search = |q: &str| AddressFilter {
            search: Some(q.to_string()),
            ..Default::default()
        };

        assert!(search("10.1.2").matches(&ip));
        assert!(search("web01").matches(&ip));
        assert!(search("dd:ee").matches(&ip));
        assert!(!search("db02").matches(&ip));
    }

    #[test]
    fn test_address_scope_and_parent() {
        let ip = address("10.1.2.3/24", "", None);
        let global = AddressFilter {
            vrf: Some(VrfScope::Global),
            parent: Some(Cidr::parse("10.1.0.0/16").unwrap()),
            ..Default::default()
        };
        assert!(global.matches(&ip));

        let other_vrf = AddressFilter {
            vrf: Some(VrfScope::Vrf(Uuid::new_v4())),
            ..Default::default()
        };
        assert!(!other_vrf.matches(&ip));

        let outside = AddressFilter {
            parent: Some(Cidr::parse("192.168.0.0/16").unwrap()),
            ..Default::default()
        };
        assert!(!outside.matches(&ip));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let ip = address("2001:db8::1/64", "", None);
        assert!(AddressFilter::default().matches(&ip));
    }
}
