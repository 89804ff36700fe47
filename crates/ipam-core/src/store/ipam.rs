//! Aggregates, prefixes, IP ranges and IP addresses
//!
//! Every create and update runs the full validation of the record against the
//! current tables (excluding the record itself on update) before anything is
//! written.

use super::{AddressFilter, IpamState, IpamStore, PrefixFilter, RangeFilter};
use crate::audit::{AuditAction, AuditEvent};
use crate::cidr::{AddressSpan, Cidr, IpVersion};
use crate::error::IpamError;
use crate::models::*;
use crate::registry::ObjectRegistry;
use chrono::Utc;
use std::cmp::Ordering;
use tracing::{debug, info};
use uuid::Uuid;

/// Parse a network CIDR for a prefix or aggregate
pub(crate) fn parse_network(text: &str) -> Result<Cidr, IpamError> {
    let cidr = Cidr::parse(text)?;
    if !cidr.is_network() {
        return Err(IpamError::InvalidPrefix(format!(
            "{} has host bits set, did you mean {}?",
            cidr,
            cidr.trunc()
        )));
    }
    if cidr.version() == IpVersion::V6 && cidr.prefix_len() == 0 {
        return Err(IpamError::InvalidPrefix("::/0 cannot be managed".to_string()));
    }
    Ok(cidr)
}

/// Order blocks by VRF (global table last), then by address
fn cmp_vrf_scoped(
    state: &IpamState,
    a: (Option<Uuid>, Cidr, u64),
    b: (Option<Uuid>, Cidr, u64),
) -> Ordering {
    a.0.is_none()
        .cmp(&b.0.is_none())
        .then_with(|| state.vrf_name(a.0).cmp(&state.vrf_name(b.0)))
        .then_with(|| a.0.cmp(&b.0))
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(&b.2))
}

fn validate_prefix(
    state: &IpamState,
    registry: &ObjectRegistry,
    request: &NewPrefix,
    exclude: Option<Uuid>,
) -> Result<Cidr, IpamError> {
    let cidr = parse_network(&request.prefix)?;
    state.ensure_vrf(request.vrf_id)?;
    state.ensure_role(request.role_id)?;
    if let Some(vlan_id) = request.vlan_id {
        if !state.vlans.contains_key(&vlan_id) {
            return Err(IpamError::NotFound(format!("VLAN {} not found", vlan_id)));
        }
    }
    registry.ensure_optional(ObjectKind::Site, request.site_id)?;
    registry.ensure_optional(ObjectKind::Tenant, request.tenant_id)?;

    let duplicate = state.prefixes.values().any(|p| {
        Some(p.id) != exclude && p.vrf_id == request.vrf_id && p.prefix == cidr
    });
    if duplicate {
        let scope = request
            .vrf_id
            .map_or_else(|| "the global table".to_string(), |id| format!("VRF {}", id));
        return Err(IpamError::DuplicateKey(format!(
            "prefix {} already exists in {}",
            cidr, scope
        )));
    }
    Ok(cidr)
}

fn validate_range(
    state: &IpamState,
    registry: &ObjectRegistry,
    config: &crate::config::IpamConfig,
    request: &NewIpRange,
    exclude: Option<Uuid>,
) -> Result<(Cidr, Cidr), IpamError> {
    let start = Cidr::parse(&request.start_address)?;
    let end = Cidr::parse(&request.end_address)?;
    let span = AddressSpan::new(start.ip(), end.ip())?;
    if start.prefix_len() != end.prefix_len() {
        return Err(IpamError::InvalidRange(format!(
            "start and end masks differ (/{} and /{})",
            start.prefix_len(),
            end.prefix_len()
        )));
    }
    state.ensure_vrf(request.vrf_id)?;
    state.ensure_role(request.role_id)?;
    registry.ensure_optional(ObjectKind::Site, request.site_id)?;

    if state.enforces_unique(config, request.vrf_id) {
        if let Some(other) = state.ranges.values().find(|r| {
            Some(r.id) != exclude && r.vrf_id == request.vrf_id && r.span().intersects(&span)
        }) {
            return Err(IpamError::Overlap(format!(
                "range {} overlaps existing range {}",
                span,
                other.span()
            )));
        }
        // A range may sit inside a prefix or cover it entirely, but not cross its edge
        if let Some(other) = state.prefixes.values().find(|p| {
            let block = p.prefix.span();
            p.vrf_id == request.vrf_id
                && block.intersects(&span)
                && !block.contains(&span)
                && !span.contains(&block)
        }) {
            return Err(IpamError::Overlap(format!(
                "range {} crosses the boundary of prefix {}",
                span, other.prefix
            )));
        }
    }
    Ok((start, end))
}

/// Allocation state a registration or update ends up in.
///
/// A FREE record never carries a binding: registering a bound address as FREE
/// records it as ASSIGNED, and binding an existing FREE record goes through the
/// allocator.
fn resolve_state(
    request: &NewIpAddress,
    current: Option<AllocationState>,
) -> Result<AllocationState, IpamError> {
    match current {
        None if request.state == AllocationState::Free && request.is_bound() => {
            Ok(AllocationState::Assigned)
        }
        None => Ok(request.state),
        Some(AllocationState::Free) if request.is_bound() => Err(IpamError::InvalidTransition(
            format!(
                "{} is FREE; allocate it to set a DNS name or binding",
                request.address
            ),
        )),
        Some(state) => Ok(state),
    }
}

/// Validate an address write; `current` is the state of the record being updated
fn validate_address(
    state: &IpamState,
    registry: &ObjectRegistry,
    config: &crate::config::IpamConfig,
    request: &NewIpAddress,
    current: Option<AllocationState>,
    exclude: Option<Uuid>,
) -> Result<(Cidr, AllocationState), IpamError> {
    let cidr = Cidr::parse(&request.address)?;
    let allocation = resolve_state(request, current)?;
    state.ensure_vrf(request.vrf_id)?;
    registry.ensure_optional(ObjectKind::Tenant, request.tenant_id)?;
    if let Some(object) = &request.assigned_object {
        registry.ensure_assignable(object)?;
    }
    if let Some(inside) = request.nat_inside {
        if Some(inside) == exclude {
            return Err(IpamError::InvalidOperation(
                "an address cannot be its own NAT inside address".to_string(),
            ));
        }
        if !state.addresses.contains_key(&inside) {
            return Err(IpamError::NotFound(format!("IP address {} not found", inside)));
        }
    }

    if (request.status != IpAddressStatus::Deprecated || allocation.is_in_use())
        && state.enforces_unique(config, request.vrf_id)
    {
        check_unique_host(state, cidr, request.vrf_id, exclude)?;
    }
    Ok((cidr, allocation))
}

/// Reject a host already held in the same VRF.
///
/// Deprecated records only give way while they are FREE.
pub(crate) fn check_unique_host(
    state: &IpamState,
    cidr: Cidr,
    vrf_id: Option<Uuid>,
    exclude: Option<Uuid>,
) -> Result<(), IpamError> {
    let host = cidr.ip();
    if let Some(other) = state.addresses.values().find(|ip| {
        Some(ip.id) != exclude
            && ip.vrf_id == vrf_id
            && ip.host() == host
            && (ip.status != IpAddressStatus::Deprecated || ip.state.is_in_use())
    }) {
        return Err(IpamError::DuplicateKey(format!(
            "{} is already registered as {} ({})",
            host, other.address, other.id
        )));
    }
    Ok(())
}

impl IpamStore {
    // Aggregates

    /// Register a top-level block for an RIR
    pub async fn create_aggregate(&self, request: NewAggregate) -> Result<Aggregate, IpamError> {
        let aggregate = {
            let mut state = self.write().await;
            let prefix = validate_aggregate(&state, &request, None)?;

            let now = Utc::now();
            let aggregate = Aggregate {
                id: Uuid::new_v4(),
                prefix,
                rir_id: request.rir_id,
                date_added: request.date_added,
                description: request.description,
                created: now,
                last_updated: now,
                seq: state.next_seq(),
            };
            state.aggregates.insert(aggregate.id, aggregate.clone());
            let event = AuditEvent::new(
                AuditAction::Create,
                "aggregates",
                aggregate.id,
                None,
                Some(&aggregate),
            );
            self.emit(event).await;
            aggregate
        };
        info!("Created aggregate {} ({})", aggregate.prefix, aggregate.id);
        Ok(aggregate)
    }

    /// Fetch an aggregate by id
    pub async fn get_aggregate(&self, id: Uuid) -> Result<Aggregate, IpamError> {
        self.read()
            .await
            .aggregates
            .get(&id)
            .cloned()
            .ok_or_else(|| IpamError::NotFound(format!("Aggregate {} not found", id)))
    }

    /// All aggregates, ordered by prefix
    pub async fn list_aggregates(&self) -> Vec<Aggregate> {
        let state = self.read().await;
        let mut aggregates: Vec<Aggregate> = state.aggregates.values().cloned().collect();
        aggregates.sort_by(|a, b| a.prefix.cmp(&b.prefix).then_with(|| a.seq.cmp(&b.seq)));
        aggregates
    }

    /// Replace an aggregate's attributes
    pub async fn update_aggregate(
        &self,
        id: Uuid,
        request: NewAggregate,
    ) -> Result<Aggregate, IpamError> {
        let aggregate = {
            let mut state = self.write().await;
            let old = state
                .aggregates
                .get(&id)
                .cloned()
                .ok_or_else(|| IpamError::NotFound(format!("Aggregate {} not found", id)))?;
            let prefix = validate_aggregate(&state, &request, Some(id))?;

            let aggregate = Aggregate {
                prefix,
                rir_id: request.rir_id,
                date_added: request.date_added,
                description: request.description,
                last_updated: Utc::now(),
                ..old.clone()
            };
            state.aggregates.insert(id, aggregate.clone());
            let event =
                AuditEvent::new(AuditAction::Update, "aggregates", id, Some(&old), Some(&aggregate));
            self.emit(event).await;
            aggregate
        };
        info!("Updated aggregate {} ({})", aggregate.prefix, aggregate.id);
        Ok(aggregate)
    }

    /// Delete an aggregate
    pub async fn delete_aggregate(&self, id: Uuid) -> Result<(), IpamError> {
        {
            let mut state = self.write().await;
            let old = state
                .aggregates
                .remove(&id)
                .ok_or_else(|| IpamError::NotFound(format!("Aggregate {} not found", id)))?;
            let event = AuditEvent::new(AuditAction::Delete, "aggregates", id, Some(&old), None);
            self.emit(event).await;
        }
        info!("Deleted aggregate {}", id);
        Ok(())
    }

    // Prefixes

    /// Insert a prefix.
    ///
    /// Fails with `InvalidFormat`/`InvalidPrefix` on malformed CIDR text and
    /// with `DuplicateKey` when the same network already exists in the VRF
    /// (or in the global table when no VRF is given).
    pub async fn create_prefix(&self, request: NewPrefix) -> Result<Prefix, IpamError> {
        let prefix = {
            let mut state = self.write().await;
            let cidr = validate_prefix(&state, &self.registry, &request, None)?;

            let now = Utc::now();
            let prefix = Prefix {
                id: Uuid::new_v4(),
                prefix: cidr,
                vrf_id: request.vrf_id,
                site_id: request.site_id,
                vlan_id: request.vlan_id,
                tenant_id: request.tenant_id,
                status: request.status,
                role_id: request.role_id,
                is_pool: request.is_pool,
                description: request.description,
                created: now,
                last_updated: now,
                seq: state.next_seq(),
            };
            state.prefixes.insert(prefix.id, prefix.clone());
            let event =
                AuditEvent::new(AuditAction::Create, "prefixes", prefix.id, None, Some(&prefix));
            self.emit(event).await;
            prefix
        };
        info!("Created prefix {} ({})", prefix.prefix, prefix.id);
        Ok(prefix)
    }

    /// Fetch a prefix by id
    pub async fn get_prefix(&self, id: Uuid) -> Result<Prefix, IpamError> {
        self.read()
            .await
            .prefixes
            .get(&id)
            .cloned()
            .ok_or_else(|| IpamError::NotFound(format!("Prefix {} not found", id)))
    }

    /// Prefixes matching `filter`, ordered by VRF then network
    pub async fn query_prefixes(&self, filter: &PrefixFilter) -> Vec<Prefix> {
        let state = self.read().await;
        let mut prefixes: Vec<Prefix> = state
            .prefixes
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        prefixes.sort_by(|a, b| {
            cmp_vrf_scoped(&state, (a.vrf_id, a.prefix, a.seq), (b.vrf_id, b.prefix, b.seq))
        });
        prefixes
    }

    /// Replace a prefix's attributes; every insert check applies
    pub async fn update_prefix(&self, id: Uuid, request: NewPrefix) -> Result<Prefix, IpamError> {
        let prefix = {
            let mut state = self.write().await;
            let old = state
                .prefixes
                .get(&id)
                .cloned()
                .ok_or_else(|| IpamError::NotFound(format!("Prefix {} not found", id)))?;
            let cidr = validate_prefix(&state, &self.registry, &request, Some(id))?;

            let prefix = Prefix {
                prefix: cidr,
                vrf_id: request.vrf_id,
                site_id: request.site_id,
                vlan_id: request.vlan_id,
                tenant_id: request.tenant_id,
                status: request.status,
                role_id: request.role_id,
                is_pool: request.is_pool,
                description: request.description,
                last_updated: Utc::now(),
                ..old.clone()
            };
            state.prefixes.insert(id, prefix.clone());
            let event =
                AuditEvent::new(AuditAction::Update, "prefixes", id, Some(&old), Some(&prefix));
            self.emit(event).await;
            prefix
        };
        info!("Updated prefix {} ({})", prefix.prefix, prefix.id);
        Ok(prefix)
    }

    /// Delete a prefix; contained prefixes, ranges and addresses are left alone
    pub async fn delete_prefix(&self, id: Uuid) -> Result<(), IpamError> {
        {
            let mut state = self.write().await;
            let old = state
                .prefixes
                .remove(&id)
                .ok_or_else(|| IpamError::NotFound(format!("Prefix {} not found", id)))?;
            let event = AuditEvent::new(AuditAction::Delete, "prefixes", id, Some(&old), None);
            self.emit(event).await;
        }
        info!("Deleted prefix {}", id);
        Ok(())
    }

    // IP ranges

    /// Insert an IP range.
    ///
    /// Fails with `InvalidRange` on mixed versions or reversed bounds, and with
    /// `Overlap` when the VRF enforces uniqueness and the range intersects
    /// another range or crosses a prefix boundary.
    pub async fn create_ip_range(&self, request: NewIpRange) -> Result<IpRange, IpamError> {
        let range = {
            let mut state = self.write().await;
            let (start, end) = validate_range(&state, &self.registry, &self.config, &request, None)?;

            let now = Utc::now();
            let range = IpRange {
                id: Uuid::new_v4(),
                start_address: start,
                end_address: end,
                vrf_id: request.vrf_id,
                site_id: request.site_id,
                status: request.status,
                role_id: request.role_id,
                description: request.description,
                created: now,
                last_updated: now,
                seq: state.next_seq(),
            };
            state.ranges.insert(range.id, range.clone());
            let event =
                AuditEvent::new(AuditAction::Create, "ip_ranges", range.id, None, Some(&range));
            self.emit(event).await;
            range
        };
        info!("Created IP range {} ({})", range.span(), range.id);
        Ok(range)
    }

    /// Fetch an IP range by id
    pub async fn get_ip_range(&self, id: Uuid) -> Result<IpRange, IpamError> {
        self.read()
            .await
            .ranges
            .get(&id)
            .cloned()
            .ok_or_else(|| IpamError::NotFound(format!("IP range {} not found", id)))
    }

    /// Ranges matching `filter`, ordered by VRF then start address
    pub async fn query_ip_ranges(&self, filter: &RangeFilter) -> Vec<IpRange> {
        let state = self.read().await;
        let mut ranges: Vec<IpRange> = state
            .ranges
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        ranges.sort_by(|a, b| {
            cmp_vrf_scoped(
                &state,
                (a.vrf_id, a.start_address, a.seq),
                (b.vrf_id, b.start_address, b.seq),
            )
        });
        ranges
    }

    /// Replace a range's attributes; every insert check applies
    pub async fn update_ip_range(&self, id: Uuid, request: NewIpRange) -> Result<IpRange, IpamError> {
        let range = {
            let mut state = self.write().await;
            let old = state
                .ranges
                .get(&id)
                .cloned()
                .ok_or_else(|| IpamError::NotFound(format!("IP range {} not found", id)))?;
            let (start, end) =
                validate_range(&state, &self.registry, &self.config, &request, Some(id))?;

            let range = IpRange {
                start_address: start,
                end_address: end,
                vrf_id: request.vrf_id,
                site_id: request.site_id,
                status: request.status,
                role_id: request.role_id,
                description: request.description,
                last_updated: Utc::now(),
                ..old.clone()
            };
            state.ranges.insert(id, range.clone());
            let event =
                AuditEvent::new(AuditAction::Update, "ip_ranges", id, Some(&old), Some(&range));
            self.emit(event).await;
            range
        };
        info!("Updated IP range {} ({})", range.span(), range.id);
        Ok(range)
    }

    /// Delete an IP range; its addresses are kept
    pub async fn delete_ip_range(&self, id: Uuid) -> Result<(), IpamError> {
        {
            let mut state = self.write().await;
            let old = state
                .ranges
                .remove(&id)
                .ok_or_else(|| IpamError::NotFound(format!("IP range {} not found", id)))?;
            let event = AuditEvent::new(AuditAction::Delete, "ip_ranges", id, Some(&old), None);
            self.emit(event).await;
        }
        info!("Deleted IP range {}", id);
        Ok(())
    }

    // IP addresses

    /// Register an IP address.
    ///
    /// Fails with `DuplicateKey` when the VRF (or the global table) enforces
    /// uniqueness and a non-deprecated or in-use address already holds the
    /// same host. A FREE registration with a DNS name or binding is recorded
    /// as ASSIGNED.
    pub async fn create_ip_address(&self, request: NewIpAddress) -> Result<IpAddress, IpamError> {
        let address = {
            let mut state = self.write().await;
            let (cidr, allocation) =
                validate_address(&state, &self.registry, &self.config, &request, None, None)?;

            let now = Utc::now();
            let address = IpAddress {
                id: Uuid::new_v4(),
                address: cidr,
                vrf_id: request.vrf_id,
                tenant_id: request.tenant_id,
                status: request.status,
                state: allocation,
                role: request.role,
                dns_name: request.dns_name,
                mac_address: request.mac_address,
                assigned_object: request.assigned_object,
                nat_inside: request.nat_inside,
                description: request.description,
                created: now,
                last_updated: now,
                seq: state.next_seq(),
            };
            state.addresses.insert(address.id, address.clone());
            let event = AuditEvent::new(
                AuditAction::Create,
                "ip_addresses",
                address.id,
                None,
                Some(&address),
            );
            self.emit(event).await;
            address
        };
        info!("Created IP address {} ({})", address.address, address.id);
        Ok(address)
    }

    /// Fetch an IP address by id
    pub async fn get_ip_address(&self, id: Uuid) -> Result<IpAddress, IpamError> {
        self.read()
            .await
            .addresses
            .get(&id)
            .cloned()
            .ok_or_else(|| IpamError::NotFound(format!("IP address {} not found", id)))
    }

    /// Addresses matching `filter`, ordered by address
    pub async fn query_ip_addresses(&self, filter: &AddressFilter) -> Vec<IpAddress> {
        let state = self.read().await;
        let mut addresses: Vec<IpAddress> = state
            .addresses
            .values()
            .filter(|ip| filter.matches(ip))
            .cloned()
            .collect();
        addresses.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.seq.cmp(&b.seq)));
        addresses
    }

    /// Update an address's attributes; the allocation state is kept.
    ///
    /// A FREE record cannot gain a DNS name or binding here (`InvalidTransition`).
    pub async fn update_ip_address(
        &self,
        id: Uuid,
        request: NewIpAddress,
    ) -> Result<IpAddress, IpamError> {
        let address = {
            let mut state = self.write().await;
            let old = state
                .addresses
                .get(&id)
                .cloned()
                .ok_or_else(|| IpamError::NotFound(format!("IP address {} not found", id)))?;
            let (cidr, _) = validate_address(
                &state,
                &self.registry,
                &self.config,
                &request,
                Some(old.state),
                Some(id),
            )?;

            let address = IpAddress {
                address: cidr,
                vrf_id: request.vrf_id,
                tenant_id: request.tenant_id,
                status: request.status,
                role: request.role,
                dns_name: request.dns_name,
                mac_address: request.mac_address,
                assigned_object: request.assigned_object,
                nat_inside: request.nat_inside,
                description: request.description,
                last_updated: Utc::now(),
                ..old.clone()
            };
            state.addresses.insert(id, address.clone());
            let event =
                AuditEvent::new(AuditAction::Update, "ip_addresses", id, Some(&old), Some(&address));
            self.emit(event).await;
            address
        };
        info!("Updated IP address {} ({})", address.address, address.id);
        Ok(address)
    }

    /// Delete an address; outside addresses that pointed at it lose their NAT link
    pub async fn delete_ip_address(&self, id: Uuid) -> Result<(), IpamError> {
        {
            let mut state = self.write().await;
            let old = state
                .addresses
                .remove(&id)
                .ok_or_else(|| IpamError::NotFound(format!("IP address {} not found", id)))?;

            let now = Utc::now();
            let mut detached = 0;
            for outside in state.addresses.values_mut().filter(|a| a.nat_inside == Some(id)) {
                outside.nat_inside = None;
                outside.last_updated = now;
                detached += 1;
            }
            if detached > 0 {
                debug!("Detached {} NAT outside address(es) from {}", detached, id);
            }
            let event = AuditEvent::new(AuditAction::Delete, "ip_addresses", id, Some(&old), None);
            self.emit(event).await;
        }
        info!("Deleted IP address {}", id);
        Ok(())
    }

    /// Outside addresses mapped to the inside address `id`
    pub async fn nat_outside(&self, id: Uuid) -> Result<Vec<IpAddress>, IpamError> {
        let state = self.read().await;
        if !state.addresses.contains_key(&id) {
            return Err(IpamError::NotFound(format!("IP address {} not found", id)));
        }
        let mut outside: Vec<IpAddress> = state
            .addresses
            .values()
            .filter(|ip| ip.nat_inside == Some(id))
            .cloned()
            .collect();
        outside.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.seq.cmp(&b.seq)));
        Ok(outside)
    }
}

fn validate_aggregate(
    state: &IpamState,
    request: &NewAggregate,
    exclude: Option<Uuid>,
) -> Result<Cidr, IpamError> {
    let prefix = parse_network(&request.prefix)?;
    if prefix.prefix_len() == 0 {
        return Err(IpamError::InvalidPrefix(
            "cannot create an aggregate with a /0 mask".to_string(),
        ));
    }
    if !state.rirs.contains_key(&request.rir_id) {
        return Err(IpamError::NotFound(format!("RIR {} not found", request.rir_id)));
    }
    let duplicate = state.aggregates.values().any(|a| {
        Some(a.id) != exclude && a.prefix == prefix && a.rir_id == request.rir_id
    });
    if duplicate {
        return Err(IpamError::DuplicateKey(format!(
            "aggregate {} already exists for RIR {}",
            prefix, request.rir_id
        )));
    }
    Ok(prefix)
}
