//! Allocation engine
//!
//! Hands out addresses from prefixes and ranges and drives the allocation
//! state of each address:
//!
//! ```text
//! FREE -> ASSIGNED -> FREE        allocate / release
//! FREE -> RESERVED -> FREE        reserve / release
//! any  -> CONFLICT -> FREE        mark_conflict / release
//! ```
//!
//! Allocation is two-phase. Candidates are scanned under the store's read
//! lock, then the chosen address is claimed with a conditional write that
//! re-checks it under the write lock. Calls against the same block are
//! serialized by a per-block lock, so they never race each other; a claim can
//! still lose to a write through an overlapping block, in which case the scan
//! is retried up to `allocation_retries` times.

use crate::audit::{AuditAction, AuditEvent};
use crate::cidr::{AddressSpan, Cidr, IpVersion, ip_from_u128, ip_to_u128};
use crate::error::IpamError;
use crate::models::*;
use crate::store::{IpamState, IpamStore};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Block an address is allocated from, resolved against the current state
#[derive(Debug, Clone)]
struct Target {
    block: BlockRef,
    span: AddressSpan,
    vrf_id: Option<Uuid>,
    /// Mask given to addresses created in this block
    mask: u8,
    /// IPv4 network and broadcast values that are never handed out
    skip: Vec<u128>,
}

impl Target {
    fn resolve(state: &IpamState, block: BlockRef) -> Result<Self, IpamError> {
        match state.block(block)? {
            Block::Aggregate(aggregate) => Err(IpamError::InvalidOperation(format!(
                "addresses are allocated from prefixes or ranges, not aggregate {}",
                aggregate.prefix
            ))),
            Block::Prefix(prefix) => {
                if prefix.status == PrefixStatus::Container && !prefix.is_pool {
                    return Err(IpamError::InvalidOperation(format!(
                        "prefix {} is a container; mark it as a pool to allocate from it",
                        prefix.prefix
                    )));
                }
                Ok(Self {
                    block,
                    span: prefix.prefix.span(),
                    vrf_id: prefix.vrf_id,
                    mask: prefix.prefix.prefix_len(),
                    skip: edges(&prefix.prefix),
                })
            }
            Block::Range(range) => {
                let span = range.span();
                // Narrowest prefix of the same VRF that holds the whole range
                let parent = state
                    .prefixes
                    .values()
                    .filter(|p| p.vrf_id == range.vrf_id && p.prefix.span().contains(&span))
                    .max_by_key(|p| p.prefix.prefix_len());
                let (mask, skip) = match parent {
                    Some(p) => (p.prefix.prefix_len(), edges(&p.prefix)),
                    None => (span.version().bits(), Vec::new()),
                };
                Ok(Self {
                    block,
                    span,
                    vrf_id: range.vrf_id,
                    mask,
                    skip,
                })
            }
        }
    }

    /// Host values currently in use inside the block
    fn used(&self, state: &IpamState) -> HashSet<u128> {
        state
            .addresses_within(self.span, Some(self.vrf_id))
            .filter(|ip| ip.occupies_host())
            .map(|ip| ip_to_u128(ip.host()))
            .collect()
    }

    fn is_allocatable(&self, ip: IpAddr) -> bool {
        self.span.contains_ip(ip) && !self.skip.contains(&ip_to_u128(ip))
    }

    /// Free candidates in ascending order.
    ///
    /// Stops after at most `used + skip + n` steps for `n` results, so a full
    /// block ends the iteration instead of spinning.
    fn free<'a>(&'a self, used: &'a HashSet<u128>) -> impl Iterator<Item = u128> + 'a {
        (self.span.first()..=self.span.last())
            .filter(move |value| !self.skip.contains(value) && !used.contains(value))
    }

    fn cidr(&self, value: u128) -> Result<Cidr, IpamError> {
        let version = self.span.version();
        let ip = ip_from_u128(version, value).ok_or_else(|| {
            IpamError::OutOfRange(format!("{} is not a valid {} address", value, version))
        })?;
        Cidr::new(ip, self.mask)
    }
}

fn edges(prefix: &Cidr) -> Vec<u128> {
    if prefix.has_reserved_edges() {
        let span = prefix.span();
        vec![span.first(), span.last()]
    } else {
        Vec::new()
    }
}

/// Claim `cidr` for an allocation inside the write lock.
///
/// Reuses an unbound FREE record for the same host and VRF when one exists,
/// otherwise inserts a new record. The claimed record takes the block's mask
/// and the request's status. Fails with `AlreadyAssigned` when the host was
/// taken since the scan.
fn claim(
    state: &mut IpamState,
    target: &Target,
    cidr: Cidr,
    request: &AllocateRequest,
) -> Result<AuditEvent, IpamError> {
    // The block may have been deleted or changed since the scan
    state.block(target.block)?;

    let host = cidr.ip();
    let mut existing: Vec<&IpAddress> = state
        .addresses
        .values()
        .filter(|ip| ip.vrf_id == target.vrf_id && ip.host() == host)
        .collect();
    if let Some(taken) = existing.iter().find(|ip| ip.occupies_host()) {
        return Err(IpamError::AlreadyAssigned(format!(
            "{} is {} ({})",
            host, taken.state, taken.id
        )));
    }
    existing.sort_by_key(|ip| ip.seq);
    let reuse = existing.first().map(|ip| ip.id);

    let now = Utc::now();
    if let Some(id) = reuse {
        let record = state
            .addresses
            .get_mut(&id)
            .ok_or_else(|| IpamError::NotFound(format!("IP address {} not found", id)))?;
        let old = record.clone();
        record.address = cidr;
        record.state = AllocationState::Assigned;
        record.status = request.status.unwrap_or_default();
        record.role = request.role.or(record.role);
        record.dns_name = request.dns_name.clone().unwrap_or_default();
        record.mac_address = request.mac_address.clone();
        record.assigned_object = request.assigned_object;
        record.tenant_id = request.tenant_id.or(record.tenant_id);
        if let Some(description) = &request.description {
            record.description = description.clone();
        }
        record.last_updated = now;
        return Ok(AuditEvent::new(
            AuditAction::Allocate,
            "ip_addresses",
            id,
            Some(&old),
            Some(&*record),
        ));
    }

    let record = IpAddress {
        id: Uuid::new_v4(),
        address: cidr,
        vrf_id: target.vrf_id,
        tenant_id: request.tenant_id,
        status: request.status.unwrap_or_default(),
        state: AllocationState::Assigned,
        role: request.role,
        dns_name: request.dns_name.clone().unwrap_or_default(),
        mac_address: request.mac_address.clone(),
        assigned_object: request.assigned_object,
        nat_inside: None,
        description: request.description.clone().unwrap_or_default(),
        created: now,
        last_updated: now,
        seq: state.next_seq(),
    };
    let event =
        AuditEvent::new(AuditAction::Allocate, "ip_addresses", record.id, None, Some(&record));
    state.addresses.insert(record.id, record);
    Ok(event)
}

/// Round `value` up to the next multiple of `step`, `None` on overflow
fn align_up(value: u128, step: u128) -> Option<u128> {
    let rem = value % step;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(step - rem)
    }
}

/// Address allocation engine over an [`IpamStore`]
#[derive(Clone, Debug)]
pub struct Allocator {
    store: IpamStore,
    locks: Arc<Mutex<HashMap<BlockRef, Arc<Mutex<()>>>>>,
}

impl Allocator {
    /// Allocator over `store`; clones share the per-block locks
    #[must_use]
    pub fn new(store: IpamStore) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &IpamStore {
        &self.store
    }

    async fn block_lock(&self, block: BlockRef) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(block).or_default().clone()
    }

    /// Drop the lock entry of `block` once no other caller holds or waits on it
    async fn prune_lock(&self, block: BlockRef, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let idle = locks
            .get(&block)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(&block);
        }
    }

    /// Run `op` under the lock of `block`, retrying up to `retries` races lost to
    /// overlapping blocks
    async fn locked<T, F, Fut>(&self, block: BlockRef, retries: u32, mut op: F) -> Result<T, IpamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IpamError>>,
    {
        let lock = self.block_lock(block).await;
        let result = {
            let _guard = lock.lock().await;
            let mut attempt = 0;
            loop {
                match op().await {
                    Err(e) if e.is_retryable() && attempt < retries => {
                        attempt += 1;
                        warn!(
                            "Allocation in {} lost a race ({}), retrying ({}/{})",
                            block, e, attempt, retries
                        );
                    }
                    result => break result,
                }
            }
        };
        self.prune_lock(block, lock).await;
        result
    }

    fn check_request(&self, request: &AllocateRequest) -> Result<(), IpamError> {
        let registry = &self.store.registry;
        registry.ensure_optional(ObjectKind::Tenant, request.tenant_id)?;
        if let Some(object) = &request.assigned_object {
            registry.ensure_assignable(object)?;
        }
        Ok(())
    }

    /// Allocate the lowest free address in a prefix or range.
    ///
    /// Skips IPv4 network and broadcast addresses of /0 to /30 blocks and every
    /// address that is ASSIGNED, RESERVED, CONFLICT or still bound. Fails with
    /// `Exhausted` when nothing is left.
    pub async fn allocate_next(
        &self,
        block: BlockRef,
        request: AllocateRequest,
    ) -> Result<IpAddress, IpamError> {
        self.check_request(&request)?;
        let request = &request;
        let retries = self.store.config().allocation_retries;
        self.locked(block, retries, move || self.try_allocate_next(block, request))
            .await
    }

    async fn try_allocate_next(
        &self,
        block: BlockRef,
        request: &AllocateRequest,
    ) -> Result<IpAddress, IpamError> {
        let (target, cidr) = {
            let state = self.store.read().await;
            let target = Target::resolve(&state, block)?;
            let used = target.used(&state);
            debug!("Scanning {} ({}) with {} address(es) in use", block, target.span, used.len());
            let value = target
                .free(&used)
                .next()
                .ok_or_else(|| IpamError::Exhausted(format!("no free address left in {}", block)))?;
            let cidr = target.cidr(value)?;
            (target, cidr)
        };

        self.commit(&target, cidr, request).await
    }

    /// Allocate a specific address inside a prefix or range.
    ///
    /// Fails with `OutOfRange` when the address is not an allocatable member of
    /// the block and with `AlreadyAssigned` when it is in use.
    pub async fn allocate_specific(
        &self,
        block: BlockRef,
        address: IpAddr,
        request: AllocateRequest,
    ) -> Result<IpAddress, IpamError> {
        self.check_request(&request)?;
        let request = &request;
        // A taken address stays taken; nothing to retry
        self.locked(block, 0, move || self.try_allocate_specific(block, address, request))
            .await
    }

    async fn try_allocate_specific(
        &self,
        block: BlockRef,
        address: IpAddr,
        request: &AllocateRequest,
    ) -> Result<IpAddress, IpamError> {
        let (target, cidr) = {
            let state = self.store.read().await;
            let target = Target::resolve(&state, block)?;
            if !target.is_allocatable(address) {
                return Err(IpamError::OutOfRange(format!(
                    "{} is not an allocatable address of {} ({})",
                    address, block, target.span
                )));
            }
            let cidr = Cidr::new(address, target.mask)?;
            (target, cidr)
        };

        self.commit(&target, cidr, request).await
    }

    async fn commit(
        &self,
        target: &Target,
        cidr: Cidr,
        request: &AllocateRequest,
    ) -> Result<IpAddress, IpamError> {
        let address = {
            let mut state = self.store.write().await;
            let event = claim(&mut state, target, cidr, request)?;
            let address = state
                .addresses
                .get(&event.record_id)
                .cloned()
                .ok_or_else(|| IpamError::NotFound(format!("IP address {} not found", event.record_id)))?;
            self.store.emit(event).await;
            address
        };
        info!("Allocated {} from {} ({})", address.address, target.block, address.id);
        Ok(address)
    }

    /// Return an address to FREE and clear its DNS name, MAC and binding.
    ///
    /// A RESERVED status set by [`Allocator::reserve`] goes back to ACTIVE.
    /// Releasing an address that is already FREE is a no-op.
    pub async fn release(&self, id: Uuid) -> Result<IpAddress, IpamError> {
        self.transition(id, AuditAction::Release, |ip| {
            if ip.state == AllocationState::Free {
                return Ok(false);
            }
            ip.state = AllocationState::Free;
            if ip.status == IpAddressStatus::Reserved {
                ip.status = IpAddressStatus::Active;
            }
            ip.dns_name.clear();
            ip.mac_address = None;
            ip.assigned_object = None;
            Ok(true)
        })
        .await
    }

    /// Hold a FREE address so that allocation skips it.
    ///
    /// Reserving an already RESERVED address is a no-op; ASSIGNED or CONFLICT
    /// addresses must be released first.
    pub async fn reserve(&self, id: Uuid) -> Result<IpAddress, IpamError> {
        self.transition(id, AuditAction::Reserve, |ip| match ip.state {
            AllocationState::Free => {
                ip.state = AllocationState::Reserved;
                ip.status = IpAddressStatus::Reserved;
                Ok(true)
            }
            AllocationState::Reserved => Ok(false),
            state => Err(IpamError::InvalidTransition(format!(
                "cannot reserve {} while it is {}; release it first",
                ip.address, state
            ))),
        })
        .await
    }

    /// Flag an address as a detected duplicate or rogue, from any state
    pub async fn mark_conflict(&self, id: Uuid) -> Result<IpAddress, IpamError> {
        self.transition(id, AuditAction::Conflict, |ip| {
            if ip.state == AllocationState::Conflict {
                return Ok(false);
            }
            ip.state = AllocationState::Conflict;
            Ok(true)
        })
        .await
    }

    /// Apply a state change to one address; `apply` returns whether anything changed
    async fn transition<F>(&self, id: Uuid, action: AuditAction, apply: F) -> Result<IpAddress, IpamError>
    where
        F: FnOnce(&mut IpAddress) -> Result<bool, IpamError>,
    {
        let address = {
            let mut state = self.store.write().await;
            let record = state
                .addresses
                .get_mut(&id)
                .ok_or_else(|| IpamError::NotFound(format!("IP address {} not found", id)))?;
            let old = record.clone();
            let mut updated = old.clone();
            if !apply(&mut updated)? {
                return Ok(old);
            }
            updated.last_updated = Utc::now();
            *record = updated.clone();
            let event = AuditEvent::new(action, "ip_addresses", id, Some(&old), Some(&updated));
            self.store.emit(event).await;
            updated
        };
        info!("{} -> {} ({})", address.address, address.state, address.id);
        Ok(address)
    }

    /// First `limit` free addresses of a prefix or range, read-only
    pub async fn available_ips(&self, block: BlockRef, limit: usize) -> Result<Vec<Cidr>, IpamError> {
        let state = self.store.read().await;
        let target = Target::resolve(&state, block)?;
        let used = target.used(&state);
        target
            .free(&used)
            .take(limit)
            .map(|value| target.cidr(value))
            .collect()
    }

    /// Carve the first free aligned child prefix of `prefix_len` out of `parent`.
    ///
    /// Existing child prefixes in the parent's VRF are avoided; the new prefix
    /// is created in that VRF. Fails with `InvalidPrefix` when the length is
    /// not longer than the parent's and `Exhausted` when nothing fits.
    pub async fn allocate_next_prefix(
        &self,
        parent: Uuid,
        request: AllocatePrefixRequest,
    ) -> Result<Prefix, IpamError> {
        let request = &request;
        let retries = self.store.config().allocation_retries;
        self.locked(BlockRef::Prefix(parent), retries, move || {
            self.try_allocate_prefix(parent, request)
        })
        .await
    }

    async fn try_allocate_prefix(
        &self,
        parent_id: Uuid,
        request: &AllocatePrefixRequest,
    ) -> Result<Prefix, IpamError> {
        let (parent, child) = {
            let state = self.store.read().await;
            let parent = state
                .prefixes
                .get(&parent_id)
                .cloned()
                .ok_or_else(|| IpamError::NotFound(format!("Prefix {} not found", parent_id)))?;
            let child = next_free_subnet(&state, &parent, request.prefix_len)?;
            (parent, child)
        };
        debug!("Carving {} out of {}", child, parent.prefix);

        self.store
            .create_prefix(NewPrefix {
                prefix: child.to_string(),
                vrf_id: parent.vrf_id,
                site_id: request.site_id,
                vlan_id: request.vlan_id,
                tenant_id: request.tenant_id,
                status: request.status,
                role_id: request.role_id,
                is_pool: request.is_pool,
                description: request.description.clone(),
            })
            .await
    }
}

/// First-fit aligned subnet of `prefix_len` inside `parent` that avoids its children
fn next_free_subnet(state: &IpamState, parent: &Prefix, prefix_len: u8) -> Result<Cidr, IpamError> {
    let version: IpVersion = parent.prefix.version();
    if prefix_len <= parent.prefix.prefix_len() || prefix_len > version.bits() {
        return Err(IpamError::InvalidPrefix(format!(
            "/{} does not fit inside {}",
            prefix_len, parent.prefix
        )));
    }

    let outer = parent.prefix.span();
    let mut children: Vec<AddressSpan> = state
        .prefixes
        .values()
        .filter(|p| p.id != parent.id && p.vrf_id == parent.vrf_id)
        .map(|p| p.prefix.span())
        .filter(|span| outer.contains(span))
        .collect();
    children.sort_by_key(|span| span.first());

    let step = 1u128 << (version.bits() - prefix_len);
    let exhausted = || {
        IpamError::Exhausted(format!("no free /{} left in {}", prefix_len, parent.prefix))
    };
    let mut candidate = outer.first();
    loop {
        let last = candidate.checked_add(step - 1).ok_or_else(exhausted)?;
        if last > outer.last() {
            return Err(exhausted());
        }
        match children
            .iter()
            .find(|child| child.first() <= last && candidate <= child.last())
        {
            Some(child) => {
                let next = child.last().checked_add(1).ok_or_else(exhausted)?;
                candidate = align_up(next, step).ok_or_else(exhausted)?;
            }
            None => {
                let ip = ip_from_u128(version, candidate).ok_or_else(exhausted)?;
                return Cidr::new(ip, prefix_len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::IpamConfig;

    async fn setup(prefix: &str) -> (Allocator, Prefix) {
        let store = IpamStore::new(IpamConfig::default());
        let prefix = store
            .create_prefix(NewPrefix {
                prefix: prefix.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        (Allocator::new(store), prefix)
    }

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_allocate_next_skips_network_and_broadcast() {
        let (allocator, prefix) = setup("10.0.0.0/29").await;
        let block = BlockRef::Prefix(prefix.id);

        let mut got = Vec::new();
        for _ in 0..6 {
            let address = allocator
                .allocate_next(block, AllocateRequest::default())
                .await
                .unwrap();
            assert_eq!(address.state, AllocationState::Assigned);
            got.push(address.address.to_string());
        }
        assert_eq!(
            got,
            vec![
                "10.0.0.1/29",
                "10.0.0.2/29",
                "10.0.0.3/29",
                "10.0.0.4/29",
                "10.0.0.5/29",
                "10.0.0.6/29"
            ]
        );

        let err = allocator.allocate_next(block, AllocateRequest::default()).await;
        assert!(matches!(err, Err(IpamError::Exhausted(_))));
    }

    #[tokio::test]
    async fn test_point_to_point_blocks_use_every_address() {
        let (allocator, prefix) = setup("10.0.0.0/31").await;
        let block = BlockRef::Prefix(prefix.id);
        let first = allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();
        let second = allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();
        assert_eq!(first.host(), ip("10.0.0.0"));
        assert_eq!(second.host(), ip("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_allocate_records_options() {
        let (allocator, prefix) = setup("192.168.10.0/24").await;
        let iface = AssignedObject {
            kind: ObjectKind::Interface,
            id: Uuid::new_v4(),
        };
        let address = allocator
            .allocate_next(
                BlockRef::Prefix(prefix.id),
                AllocateRequest {
                    dns_name: Some("web01.example.com".to_string()),
                    mac_address: Some("52:54:00:12:34:56".to_string()),
                    assigned_object: Some(iface),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(address.dns_name, "web01.example.com");
        assert_eq!(address.mac_address.as_deref(), Some("52:54:00:12:34:56"));
        assert_eq!(address.assigned_object, Some(iface));
        assert_eq!(address.status, IpAddressStatus::Active);
    }

    #[tokio::test]
    async fn test_release_then_allocate_specific_returns_same_address() {
        let (allocator, prefix) = setup("10.0.0.0/24").await;
        let block = BlockRef::Prefix(prefix.id);
        let first = allocator
            .allocate_next(
                block,
                AllocateRequest {
                    dns_name: Some("a.example.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let released = allocator.release(first.id).await.unwrap();
        assert_eq!(released.state, AllocationState::Free);
        assert!(released.dns_name.is_empty());

        // Idempotent
        let again = allocator.release(first.id).await.unwrap();
        assert_eq!(again.state, AllocationState::Free);

        let back = allocator
            .allocate_specific(block, first.host(), AllocateRequest::default())
            .await
            .unwrap();
        assert_eq!(back.id, first.id);
        assert_eq!(back.address, first.address);
        assert_eq!(back.state, AllocationState::Assigned);

        // A FREE record registered with a host mask takes the block's mask
        let host = allocator
            .store()
            .create_ip_address(NewIpAddress {
                address: "10.0.0.7/32".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let claimed = allocator
            .allocate_specific(block, ip("10.0.0.7"), AllocateRequest::default())
            .await
            .unwrap();
        assert_eq!(claimed.id, host.id);
        assert_eq!(claimed.address.to_string(), "10.0.0.7/24");
    }

    #[tokio::test]
    async fn test_bound_registration_is_never_taken_over() {
        let (allocator, prefix) = setup("10.0.0.0/24").await;
        let router = AssignedObject {
            kind: ObjectKind::Interface,
            id: Uuid::new_v4(),
        };
        let registered = allocator
            .store()
            .create_ip_address(NewIpAddress {
                address: "10.0.0.1/24".to_string(),
                dns_name: "core-rtr".to_string(),
                assigned_object: Some(router),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(registered.state, AllocationState::Assigned);

        let other = AssignedObject {
            kind: ObjectKind::Interface,
            id: Uuid::new_v4(),
        };
        let next = allocator
            .allocate_next(
                BlockRef::Prefix(prefix.id),
                AllocateRequest {
                    assigned_object: Some(other),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_ne!(next.id, registered.id);
        assert_eq!(next.host(), ip("10.0.0.2"));

        let kept = allocator.store().get_ip_address(registered.id).await.unwrap();
        assert_eq!(kept.dns_name, "core-rtr");
        assert_eq!(kept.assigned_object, Some(router));
    }

    #[tokio::test]
    async fn test_reused_deprecated_record_takes_request_status() {
        let (allocator, prefix) = setup("10.0.0.0/24").await;
        let deprecated = allocator
            .store()
            .create_ip_address(NewIpAddress {
                address: "10.0.0.1/24".to_string(),
                status: IpAddressStatus::Deprecated,
                ..Default::default()
            })
            .await
            .unwrap();

        let allocated = allocator
            .allocate_next(BlockRef::Prefix(prefix.id), AllocateRequest::default())
            .await
            .unwrap();
        assert_eq!(allocated.id, deprecated.id);
        assert_eq!(allocated.status, IpAddressStatus::Active);

        let err = allocator
            .store()
            .create_ip_address(NewIpAddress {
                address: "10.0.0.1/24".to_string(),
                ..Default::default()
            })
            .await;
        assert!(matches!(err, Err(IpamError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_release_after_reserve_restores_active_status() {
        let (allocator, prefix) = setup("10.0.0.0/24").await;
        let free = allocator
            .store()
            .create_ip_address(NewIpAddress {
                address: "10.0.0.1/24".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        allocator.reserve(free.id).await.unwrap();
        let released = allocator.release(free.id).await.unwrap();
        assert_eq!(released.status, IpAddressStatus::Active);

        let again = allocator
            .allocate_next(BlockRef::Prefix(prefix.id), AllocateRequest::default())
            .await
            .unwrap();
        assert_eq!(again.id, free.id);
        assert_eq!(again.state, AllocationState::Assigned);
        assert_eq!(again.status, IpAddressStatus::Active);
    }

    #[tokio::test]
    async fn test_block_locks_are_dropped_when_idle() {
        let (allocator, prefix) = setup("10.0.0.0/24").await;
        let block = BlockRef::Prefix(prefix.id);
        allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();
        allocator
            .allocate_specific(block, ip("10.0.0.9"), AllocateRequest::default())
            .await
            .unwrap();
        allocator
            .allocate_next_prefix(
                prefix.id,
                AllocatePrefixRequest {
                    prefix_len: 28,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(
            allocator
                .allocate_next(BlockRef::Prefix(Uuid::new_v4()), AllocateRequest::default())
                .await
                .is_err()
        );

        assert!(allocator.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_allocate_specific_errors() {
        let (allocator, prefix) = setup("10.0.0.0/24").await;
        let block = BlockRef::Prefix(prefix.id);

        for outside in ["10.0.1.5", "10.0.0.0", "10.0.0.255", "2001:db8::1"] {
            let err = allocator
                .allocate_specific(block, ip(outside), AllocateRequest::default())
                .await;
            assert!(matches!(err, Err(IpamError::OutOfRange(_))), "{}", outside);
        }

        allocator
            .allocate_specific(block, ip("10.0.0.42"), AllocateRequest::default())
            .await
            .unwrap();
        let err = allocator
            .allocate_specific(block, ip("10.0.0.42"), AllocateRequest::default())
            .await;
        assert!(matches!(err, Err(IpamError::AlreadyAssigned(_))));
    }

    #[tokio::test]
    async fn test_reserve_transitions() {
        let (allocator, prefix) = setup("10.0.0.0/24").await;
        let block = BlockRef::Prefix(prefix.id);
        let free = allocator
            .store()
            .create_ip_address(NewIpAddress {
                address: "10.0.0.1/24".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let reserved = allocator.reserve(free.id).await.unwrap();
        assert_eq!(reserved.state, AllocationState::Reserved);
        assert_eq!(reserved.status, IpAddressStatus::Reserved);
        assert!(allocator.reserve(free.id).await.is_ok());

        let next = allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();
        assert_eq!(next.host(), ip("10.0.0.2"));

        let err = allocator.reserve(next.id).await;
        assert!(matches!(err, Err(IpamError::InvalidTransition(_))));
        assert_eq!(
            allocator.store().get_ip_address(next.id).await.unwrap().state,
            AllocationState::Assigned
        );
    }

    #[tokio::test]
    async fn test_conflict_blocks_allocation_until_released() {
        let (allocator, prefix) = setup("10.0.0.0/30").await;
        let block = BlockRef::Prefix(prefix.id);
        let a = allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();
        allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();

        let conflicted = allocator.mark_conflict(a.id).await.unwrap();
        assert_eq!(conflicted.state, AllocationState::Conflict);
        assert!(matches!(
            allocator.reserve(a.id).await,
            Err(IpamError::InvalidTransition(_))
        ));
        assert!(matches!(
            allocator.allocate_next(block, AllocateRequest::default()).await,
            Err(IpamError::Exhausted(_))
        ));

        allocator.release(a.id).await.unwrap();
        let again = allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();
        assert_eq!(again.id, a.id);
    }

    #[tokio::test]
    async fn test_container_requires_pool_flag() {
        let store = IpamStore::new(IpamConfig::default());
        let container = store
            .create_prefix(NewPrefix {
                prefix: "10.0.0.0/16".to_string(),
                status: PrefixStatus::Container,
                ..Default::default()
            })
            .await
            .unwrap();
        let pool = store
            .create_prefix(NewPrefix {
                prefix: "10.1.0.0/16".to_string(),
                status: PrefixStatus::Container,
                is_pool: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let allocator = Allocator::new(store);

        let err = allocator
            .allocate_next(BlockRef::Prefix(container.id), AllocateRequest::default())
            .await;
        assert!(matches!(err, Err(IpamError::InvalidOperation(_))));
        assert!(
            allocator
                .allocate_next(BlockRef::Prefix(pool.id), AllocateRequest::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_range_allocation_uses_parent_mask() {
        let (allocator, _prefix) = setup("10.0.0.0/24").await;
        let range = allocator
            .store()
            .create_ip_range(NewIpRange {
                start_address: "10.0.0.100/24".to_string(),
                end_address: "10.0.0.101/24".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let block = BlockRef::Range(range.id);

        let a = allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();
        let b = allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();
        assert_eq!(a.address.to_string(), "10.0.0.100/24");
        assert_eq!(b.address.to_string(), "10.0.0.101/24");
        assert!(matches!(
            allocator.allocate_next(block, AllocateRequest::default()).await,
            Err(IpamError::Exhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_ipv6_allocation_and_available_ips() {
        let (allocator, prefix) = setup("2001:db8::/64").await;
        let block = BlockRef::Prefix(prefix.id);
        allocator.allocate_next(block, AllocateRequest::default()).await.unwrap();

        let available = allocator.available_ips(block, 3).await.unwrap();
        let texts: Vec<String> = available.iter().map(ToString::to_string).collect();
        assert_eq!(texts, vec!["2001:db8::1/64", "2001:db8::2/64", "2001:db8::3/64"]);
    }

    #[tokio::test]
    async fn test_allocate_from_aggregate_is_rejected() {
        let store = IpamStore::new(IpamConfig::default());
        let rir = store
            .create_rir(NewRir {
                name: "ARIN".to_string(),
                slug: "arin".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let aggregate = store
            .create_aggregate(NewAggregate {
                prefix: "198.51.100.0/24".to_string(),
                rir_id: rir.id,
                date_added: None,
                description: String::new(),
            })
            .await
            .unwrap();
        let allocator = Allocator::new(store);
        assert!(matches!(
            allocator
                .allocate_next(BlockRef::Aggregate(aggregate.id), AllocateRequest::default())
                .await,
            Err(IpamError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_allocate_next_prefix_first_fit() {
        let (allocator, parent) = setup("10.0.0.0/22").await;
        allocator
            .store()
            .create_prefix(NewPrefix {
                prefix: "10.0.0.0/24".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let request = |len| AllocatePrefixRequest {
            prefix_len: len,
            ..Default::default()
        };
        let a = allocator.allocate_next_prefix(parent.id, request(24)).await.unwrap();
        assert_eq!(a.prefix.to_string(), "10.0.1.0/24");
        let b = allocator.allocate_next_prefix(parent.id, request(23)).await.unwrap();
        assert_eq!(b.prefix.to_string(), "10.0.2.0/23");
        assert!(matches!(
            allocator.allocate_next_prefix(parent.id, request(24)).await,
            Err(IpamError::Exhausted(_))
        ));
        assert!(matches!(
            allocator.allocate_next_prefix(parent.id, request(22)).await,
            Err(IpamError::InvalidPrefix(_))
        ));
    }

    #[tokio::test]
    async fn test_state_changes_are_audited() {
        let sink = MemoryAuditSink::new();
        let store = IpamStore::new(IpamConfig::default()).with_audit_sink(Arc::new(sink.clone()));
        let prefix = store
            .create_prefix(NewPrefix {
                prefix: "10.0.0.0/24".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let allocator = Allocator::new(store);

        let address = allocator
            .allocate_next(BlockRef::Prefix(prefix.id), AllocateRequest::default())
            .await
            .unwrap();
        allocator.release(address.id).await.unwrap();
        // No-op release emits nothing
        allocator.release(address.id).await.unwrap();
        allocator.reserve(address.id).await.unwrap();
        allocator.mark_conflict(address.id).await.unwrap();

        let actions: Vec<AuditAction> = sink.events().await.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Create,
                AuditAction::Allocate,
                AuditAction::Release,
                AuditAction::Reserve,
                AuditAction::Conflict
            ]
        );
    }
}
