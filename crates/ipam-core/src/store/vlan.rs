//! VLAN operations

use super::{IpamState, IpamStore, VlanFilter};
use crate::audit::{AuditAction, AuditEvent};
use crate::error::IpamError;
use crate::models::*;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

const VID_MIN: u16 = 1;
const VID_MAX: u16 = 4094;

fn validate_vlan(
    state: &IpamState,
    request: &NewVlan,
    exclude: Option<Uuid>,
) -> Result<(), IpamError> {
    if !(VID_MIN..=VID_MAX).contains(&request.vid) {
        return Err(IpamError::InvalidFormat(format!(
            "VLAN ID {} is outside {}-{}",
            request.vid, VID_MIN, VID_MAX
        )));
    }
    state.ensure_role(request.role_id)?;

    if let Some(site_id) = request.site_id {
        let taken = state.vlans.values().any(|v| {
            Some(v.id) != exclude && v.site_id == Some(site_id) && v.vid == request.vid
        });
        if taken {
            return Err(IpamError::DuplicateKey(format!(
                "VLAN {} already exists at site {}",
                request.vid, site_id
            )));
        }
    }
    Ok(())
}

impl IpamStore {
    /// Insert a VLAN; (site, vid) is unique when a site is set
    pub async fn create_vlan(&self, request: NewVlan) -> Result<Vlan, IpamError> {
        self.registry.ensure_optional(ObjectKind::Site, request.site_id)?;
        self.registry.ensure_optional(ObjectKind::Tenant, request.tenant_id)?;

        let vlan = {
            let mut state = self.write().await;
            validate_vlan(&state, &request, None)?;

            let now = Utc::now();
            let vlan = Vlan {
                id: Uuid::new_v4(),
                site_id: request.site_id,
                vid: request.vid,
                name: request.name,
                tenant_id: request.tenant_id,
                status: request.status,
                role_id: request.role_id,
                description: request.description,
                created: now,
                last_updated: now,
            };
            state.vlans.insert(vlan.id, vlan.clone());
            let event = AuditEvent::new(AuditAction::Create, "vlans", vlan.id, None, Some(&vlan));
            self.emit(event).await;
            vlan
        };
        info!("Created VLAN {} '{}' ({})", vlan.vid, vlan.name, vlan.id);
        Ok(vlan)
    }

    /// Fetch a VLAN by id
    pub async fn get_vlan(&self, id: Uuid) -> Result<Vlan, IpamError> {
        self.read()
            .await
            .vlans
            .get(&id)
            .cloned()
            .ok_or_else(|| IpamError::NotFound(format!("VLAN {} not found", id)))
    }

    /// VLANs matching `filter`, ordered by site (unscoped last) then VID
    pub async fn query_vlans(&self, filter: &VlanFilter) -> Vec<Vlan> {
        let state = self.read().await;
        let mut vlans: Vec<Vlan> = state
            .vlans
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        vlans.sort_by(|a, b| {
            a.site_id
                .is_none()
                .cmp(&b.site_id.is_none())
                .then_with(|| a.site_id.cmp(&b.site_id))
                .then_with(|| a.vid.cmp(&b.vid))
                .then_with(|| a.created.cmp(&b.created))
        });
        vlans
    }

    /// Replace a VLAN's attributes, revalidating (site, vid) uniqueness
    pub async fn update_vlan(&self, id: Uuid, request: NewVlan) -> Result<Vlan, IpamError> {
        self.registry.ensure_optional(ObjectKind::Site, request.site_id)?;
        self.registry.ensure_optional(ObjectKind::Tenant, request.tenant_id)?;

        let vlan = {
            let mut state = self.write().await;
            let old = state
                .vlans
                .get(&id)
                .cloned()
                .ok_or_else(|| IpamError::NotFound(format!("VLAN {} not found", id)))?;
            validate_vlan(&state, &request, Some(id))?;

            let vlan = Vlan {
                site_id: request.site_id,
                vid: request.vid,
                name: request.name,
                tenant_id: request.tenant_id,
                status: request.status,
                role_id: request.role_id,
                description: request.description,
                last_updated: Utc::now(),
                ..old.clone()
            };
            state.vlans.insert(id, vlan.clone());
            let event = AuditEvent::new(AuditAction::Update, "vlans", id, Some(&old), Some(&vlan));
            self.emit(event).await;
            vlan
        };
        info!("Updated VLAN {} '{}' ({})", vlan.vid, vlan.name, vlan.id);
        Ok(vlan)
    }

    /// Delete a VLAN that no prefix references
    pub async fn delete_vlan(&self, id: Uuid) -> Result<(), IpamError> {
        {
            let mut state = self.write().await;
            if !state.vlans.contains_key(&id) {
                return Err(IpamError::NotFound(format!("VLAN {} not found", id)));
            }
            let in_use = state.prefixes.values().filter(|p| p.vlan_id == Some(id)).count();
            if in_use > 0 {
                return Err(IpamError::ProtectedDelete(format!(
                    "VLAN {} is referenced by {} prefix(es)",
                    id, in_use
                )));
            }
            let old = state.vlans.remove(&id);
            let event = AuditEvent::new(AuditAction::Delete, "vlans", id, old.as_ref(), None);
            self.emit(event).await;
        }
        info!("Deleted VLAN {}", id);
        Ok(())
    }
}
