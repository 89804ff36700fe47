//! Address-space hierarchy store
//!
//! Holds RIRs, VRFs, roles, aggregates, prefixes, ranges, addresses and VLANs
//! in memory and enforces their invariants at write time. Each write validates
//! the whole record against the current state before touching it, under one
//! write lock, so a failed check never leaves a partial write.
//!
//! The store is organized into domain-specific modules:
//! - `ipam.rs` - aggregates, prefixes, IP ranges and IP addresses
//! - `vrf.rs` - VRFs, RIRs and roles
//! - `vlan.rs` - VLANs
//! - `filters.rs` - list filters used by the REST boundary

pub mod filters;
mod ipam;
mod vlan;
mod vrf;

pub use filters::{AddressFilter, PrefixFilter, RangeFilter, VlanFilter, VrfScope};

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::cidr::AddressSpan;
use crate::config::IpamConfig;
use crate::error::IpamError;
use crate::models::*;
use crate::registry::ObjectRegistry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// In-memory tables
#[derive(Debug, Default)]
pub(crate) struct IpamState {
    pub(crate) rirs: HashMap<Uuid, Rir>,
    pub(crate) vrfs: HashMap<Uuid, Vrf>,
    pub(crate) roles: HashMap<Uuid, Role>,
    pub(crate) aggregates: HashMap<Uuid, Aggregate>,
    pub(crate) prefixes: HashMap<Uuid, Prefix>,
    pub(crate) ranges: HashMap<Uuid, IpRange>,
    pub(crate) addresses: HashMap<Uuid, IpAddress>,
    pub(crate) vlans: HashMap<Uuid, Vlan>,
    // Creation order, used to break ties deterministically
    next_seq: u64,
}

impl IpamState {
    pub(crate) fn next_seq(&mut self) -> u64 {
        let current = self.next_seq;
        self.next_seq += 1;
        current
    }

    /// Whether uniqueness is enforced for the given VRF (or the global table)
    pub(crate) fn enforces_unique(&self, config: &IpamConfig, vrf_id: Option<Uuid>) -> bool {
        match vrf_id {
            Some(id) => self.vrfs.get(&id).is_none_or(|vrf| vrf.enforce_unique),
            None => config.enforce_global_unique,
        }
    }

    pub(crate) fn ensure_vrf(&self, vrf_id: Option<Uuid>) -> Result<(), IpamError> {
        match vrf_id {
            Some(id) if !self.vrfs.contains_key(&id) => {
                Err(IpamError::NotFound(format!("VRF {} not found", id)))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn ensure_role(&self, role_id: Option<Uuid>) -> Result<(), IpamError> {
        match role_id {
            Some(id) if !self.roles.contains_key(&id) => {
                Err(IpamError::NotFound(format!("Role {} not found", id)))
            }
            _ => Ok(()),
        }
    }

    /// Resolve a block reference
    pub(crate) fn block(&self, block: BlockRef) -> Result<Block, IpamError> {
        match block {
            BlockRef::Aggregate(id) => self
                .aggregates
                .get(&id)
                .cloned()
                .map(Block::Aggregate)
                .ok_or_else(|| IpamError::NotFound(format!("Aggregate {} not found", id))),
            BlockRef::Prefix(id) => self
                .prefixes
                .get(&id)
                .cloned()
                .map(Block::Prefix)
                .ok_or_else(|| IpamError::NotFound(format!("Prefix {} not found", id))),
            BlockRef::Range(id) => self
                .ranges
                .get(&id)
                .cloned()
                .map(Block::Range)
                .ok_or_else(|| IpamError::NotFound(format!("IP range {} not found", id))),
        }
    }

    /// Every block, unordered
    pub(crate) fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.aggregates
            .values()
            .cloned()
            .map(Block::Aggregate)
            .chain(self.prefixes.values().cloned().map(Block::Prefix))
            .chain(self.ranges.values().cloned().map(Block::Range))
    }

    /// Addresses whose host lies in `span`.
    ///
    /// `vrf` is `None` for VRF-agnostic lookups (aggregates), otherwise the
    /// address must live in exactly that VRF (`Some(None)` is the global table).
    pub(crate) fn addresses_within(
        &self,
        span: AddressSpan,
        vrf: Option<Option<Uuid>>,
    ) -> impl Iterator<Item = &IpAddress> + '_ {
        self.addresses.values().filter(move |ip| {
            span.contains_ip(ip.host()) && vrf.is_none_or(|vrf_id| ip.vrf_id == vrf_id)
        })
    }

    /// VRF scope that applies to the contents of a block
    pub(crate) fn block_scope(block: &Block) -> Option<Option<Uuid>> {
        match block {
            Block::Aggregate(_) => None,
            Block::Prefix(p) => Some(p.vrf_id),
            Block::Range(r) => Some(r.vrf_id),
        }
    }

    fn vrf_name(&self, vrf_id: Option<Uuid>) -> Option<&str> {
        vrf_id
            .and_then(|id| self.vrfs.get(&id))
            .map(|vrf| vrf.name.as_str())
    }
}

/// Shared handle to the IPAM tables
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct IpamStore {
    pub(crate) state: Arc<RwLock<IpamState>>,
    pub(crate) config: Arc<IpamConfig>,
    pub(crate) registry: Arc<ObjectRegistry>,
    pub(crate) audit: Arc<dyn AuditSink>,
}

impl IpamStore {
    /// Create an empty store that trusts external references and audits to tracing
    #[must_use]
    pub fn new(config: IpamConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(IpamState::default())),
            config: Arc::new(config),
            registry: Arc::new(ObjectRegistry::permissive()),
            audit: Arc::new(TracingAuditSink),
        }
    }

    /// Use `registry` to check site, tenant and assigned-object references
    #[must_use]
    pub fn with_registry(mut self, registry: ObjectRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Send audit events to `sink`
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    #[must_use]
    pub fn config(&self) -> &IpamConfig {
        &self.config
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, IpamState> {
        self.state.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, IpamState> {
        self.state.write().await
    }

    /// Deliver an audit event.
    ///
    /// Writers call this while still holding the write guard so the sink sees
    /// events in commit order.
    pub(crate) async fn emit(&self, event: AuditEvent) {
        self.audit.record(event).await;
    }

    /// Resolve a block reference against the current state
    pub async fn get_block(&self, block: BlockRef) -> Result<Block, IpamError> {
        self.read().await.block(block)
    }
}

impl fmt::Debug for IpamStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpamStore")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
