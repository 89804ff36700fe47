//! IPAM models
//!
//! Plain records for the address-space hierarchy and the request payloads used
//! to create or update them. Containment between aggregates, prefixes, ranges
//! and addresses is never stored; it is derived from CIDR arithmetic.

use crate::cidr::{AddressSpan, Cidr, IpVersion};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Regional Internet Registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Rir {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_private: bool, // RFC1918 and friends
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Virtual Routing and Forwarding instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Vrf {
    pub id: Uuid,
    pub name: String,
    pub rd: Option<String>, // route distinguisher, ASN:ID
    pub tenant_id: Option<Uuid>,
    /// Reject duplicate addresses and overlapping ranges inside this VRF
    pub enforce_unique: bool,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Functional role of prefixes, ranges and VLANs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub weight: u32,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Top-level block allocated by an RIR
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Aggregate {
    pub id: Uuid,
    pub prefix: Cidr,
    pub rir_id: Uuid,
    pub date_added: Option<NaiveDate>,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

/// CIDR block, optionally scoped to a VRF
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Prefix {
    pub id: Uuid,
    pub prefix: Cidr, // e.g., "192.168.1.0/24"
    pub vrf_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub vlan_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub status: PrefixStatus,
    pub role_id: Option<Uuid>,
    /// Addresses may be allocated directly, even when the status is `container`
    pub is_pool: bool,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Prefix {
    /// Address family (4 or 6)
    #[must_use]
    pub fn family(&self) -> u8 {
        self.prefix.version().family()
    }

    /// Number of addresses in the prefix
    #[must_use]
    pub fn size(&self) -> u128 {
        self.prefix.size()
    }
}

/// Contiguous span of addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IpRange {
    pub id: Uuid,
    pub start_address: Cidr,
    pub end_address: Cidr,
    pub vrf_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub status: IpAddressStatus,
    pub role_id: Option<Uuid>,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl IpRange {
    /// Numeric span from start to end inclusive
    #[must_use]
    pub fn span(&self) -> AddressSpan {
        // start <= end and matching versions are enforced on every write
        AddressSpan::new(self.start_address.ip(), self.end_address.ip())
            .unwrap_or_else(|_| Cidr::host(self.start_address.ip()).span())
    }

    /// Number of addresses, end - start + 1
    #[must_use]
    pub fn size(&self) -> u128 {
        self.span().size()
    }

    #[must_use]
    pub fn family(&self) -> u8 {
        self.start_address.version().family()
    }
}

/// Single address with its mask
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IpAddress {
    pub id: Uuid,
    pub address: Cidr, // e.g., "192.168.1.1/24"
    pub vrf_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub status: IpAddressStatus,
    /// Allocation lifecycle state
    pub state: AllocationState,
    pub role: Option<IpAddressRole>,
    pub dns_name: String,
    pub mac_address: Option<String>,
    pub assigned_object: Option<AssignedObject>,
    /// Inside address of a NAT mapping (one inside, many outside)
    pub nat_inside: Option<Uuid>,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl IpAddress {
    /// Host part of the address
    #[must_use]
    pub fn host(&self) -> IpAddr {
        self.address.ip()
    }

    #[must_use]
    pub fn family(&self) -> u8 {
        self.address.version().family()
    }

    /// Carries a DNS name or an object binding
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.assigned_object.is_some() || !self.dns_name.is_empty()
    }

    /// Holds its host against allocation: in use, or FREE but still bound
    #[must_use]
    pub fn occupies_host(&self) -> bool {
        self.state.is_in_use() || self.is_bound()
    }
}

/// VLAN, optionally scoped to a site
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Vlan {
    pub id: Uuid,
    pub site_id: Option<Uuid>,
    pub vid: u16,
    pub name: String,
    pub tenant_id: Option<Uuid>,
    pub status: VlanStatus,
    pub role_id: Option<Uuid>,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Prefix status choices
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PrefixStatus {
    Container,
    #[default]
    Active,
    Reserved,
    Deprecated,
}

/// IP address (and range) status choices
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IpAddressStatus {
    #[default]
    Active,
    Reserved,
    Deprecated,
    Dhcp,
    Slaac,
}

/// Allocation lifecycle of an address
///
/// `Free -> Assigned -> Free`, `Free -> Reserved -> Free`, any state to
/// `Conflict` by hand, and `Conflict -> Free` by hand. Nothing expires on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AllocationState {
    #[default]
    Free,
    Assigned,
    Reserved,
    Conflict,
}

impl AllocationState {
    /// Counts towards utilization and blocks allocation
    #[must_use]
    pub fn is_in_use(self) -> bool {
        !matches!(self, AllocationState::Free)
    }
}

impl fmt::Display for AllocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AllocationState::Free => "FREE",
            AllocationState::Assigned => "ASSIGNED",
            AllocationState::Reserved => "RESERVED",
            AllocationState::Conflict => "CONFLICT",
        };
        f.write_str(name)
    }
}

/// IP address role choices
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IpAddressRole {
    Loopback,
    Secondary,
    Anycast,
    Vip,
    Vrrp,
    Hsrp,
    Glbp,
    Carp,
}

/// VLAN status choices
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VlanStatus {
    #[default]
    Active,
    Reserved,
    Deprecated,
}

/// Kinds of objects owned by external registries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Site,
    Tenant,
    Interface,
    VmInterface,
    Service,
}

impl ObjectKind {
    /// Whether an IP address may be bound to objects of this kind
    #[must_use]
    pub fn is_assignable(self) -> bool {
        matches!(
            self,
            ObjectKind::Interface | ObjectKind::VmInterface | ObjectKind::Service
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Site => "site",
            ObjectKind::Tenant => "tenant",
            ObjectKind::Interface => "interface",
            ObjectKind::VmInterface => "vm_interface",
            ObjectKind::Service => "service",
        };
        f.write_str(name)
    }
}

/// Weak reference to the object an address is bound to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub struct AssignedObject {
    pub kind: ObjectKind,
    pub id: Uuid,
}

/// Reference to an addressable block
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum BlockRef {
    Aggregate(Uuid),
    Prefix(Uuid),
    Range(Uuid),
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Aggregate(id) => write!(f, "aggregate {}", id),
            BlockRef::Prefix(id) => write!(f, "prefix {}", id),
            BlockRef::Range(id) => write!(f, "range {}", id),
        }
    }
}

/// An addressable block as returned by hierarchy queries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Aggregate(Aggregate),
    Prefix(Prefix),
    Range(IpRange),
}

impl Block {
    #[must_use]
    pub fn block_ref(&self) -> BlockRef {
        match self {
            Block::Aggregate(a) => BlockRef::Aggregate(a.id),
            Block::Prefix(p) => BlockRef::Prefix(p.id),
            Block::Range(r) => BlockRef::Range(r.id),
        }
    }

    /// Addresses covered by the block
    #[must_use]
    pub fn span(&self) -> AddressSpan {
        match self {
            Block::Aggregate(a) => a.prefix.span(),
            Block::Prefix(p) => p.prefix.span(),
            Block::Range(r) => r.span(),
        }
    }

    #[must_use]
    pub fn version(&self) -> IpVersion {
        self.span().version()
    }

    /// VRF of the block; aggregates are VRF-agnostic
    #[must_use]
    pub fn vrf_id(&self) -> Option<Uuid> {
        match self {
            Block::Aggregate(_) => None,
            Block::Prefix(p) => p.vrf_id,
            Block::Range(r) => r.vrf_id,
        }
    }

    pub(crate) fn seq(&self) -> u64 {
        match self {
            Block::Aggregate(a) => a.seq,
            Block::Prefix(p) => p.seq,
            Block::Range(r) => r.seq,
        }
    }
}

// Request payloads

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1000
}

/// Request body for registering an RIR
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewRir {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub description: String,
}

/// Request body for creating or updating a VRF
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewVrf {
    pub name: String,
    #[serde(default)]
    pub rd: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub enforce_unique: bool,
    #[serde(default)]
    pub description: String,
}

impl Default for NewVrf {
    fn default() -> Self {
        Self {
            name: String::new(),
            rd: None,
            tenant_id: None,
            enforce_unique: true,
            description: String::new(),
        }
    }
}

/// Request body for creating a role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewRole {
    pub name: String,
    pub slug: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub description: String,
}

/// Request body for registering an aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewAggregate {
    pub prefix: String,
    pub rir_id: Uuid,
    #[serde(default)]
    pub date_added: Option<NaiveDate>,
    #[serde(default)]
    pub description: String,
}

/// Request body for creating or updating a prefix
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct NewPrefix {
    pub prefix: String,
    pub vrf_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub vlan_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub status: PrefixStatus,
    pub role_id: Option<Uuid>,
    pub is_pool: bool,
    pub description: String,
}

/// Request body for creating or updating an IP range
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct NewIpRange {
    pub start_address: String,
    pub end_address: String,
    pub vrf_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub status: IpAddressStatus,
    pub role_id: Option<Uuid>,
    pub description: String,
}

/// Request body for registering or updating an IP address
///
/// `state` only applies on registration; updates keep the current state and
/// state changes go through the allocation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct NewIpAddress {
    pub address: String,
    pub vrf_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub status: IpAddressStatus,
    pub state: AllocationState,
    pub role: Option<IpAddressRole>,
    pub dns_name: String,
    pub mac_address: Option<String>,
    pub assigned_object: Option<AssignedObject>,
    pub nat_inside: Option<Uuid>,
    pub description: String,
}

impl NewIpAddress {
    /// Carries a DNS name or an object binding
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.assigned_object.is_some() || !self.dns_name.is_empty()
    }
}

/// Request body for creating or updating a VLAN
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct NewVlan {
    pub site_id: Option<Uuid>,
    pub vid: u16,
    pub name: String,
    pub tenant_id: Option<Uuid>,
    pub status: VlanStatus,
    pub role_id: Option<Uuid>,
    pub description: String,
}

/// Options recorded on an address when it is allocated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AllocateRequest {
    pub status: Option<IpAddressStatus>,
    pub role: Option<IpAddressRole>,
    pub dns_name: Option<String>, // hostname or FQDN
    pub mac_address: Option<String>,
    pub assigned_object: Option<AssignedObject>,
    pub tenant_id: Option<Uuid>,
    pub description: Option<String>,
}

/// Request body for carving a child prefix out of a parent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AllocatePrefixRequest {
    pub prefix_len: u8,
    pub site_id: Option<Uuid>,
    pub vlan_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub status: PrefixStatus,
    pub role_id: Option<Uuid>,
    pub is_pool: bool,
    pub description: String,
}
