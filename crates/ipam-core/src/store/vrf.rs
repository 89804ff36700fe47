//! VRF, RIR and role operations
//!
//! These are shared, independently-lived objects; deleting one that is still
//! referenced fails with `ProtectedDelete` instead of cascading.

use super::{IpamState, IpamStore};
use crate::audit::{AuditAction, AuditEvent};
use crate::error::IpamError;
use crate::models::*;
use chrono::Utc;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

fn check_unique_name<'a, I>(existing: I, kind: &str, name: &str, slug: &str) -> Result<(), IpamError>
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    for (other_name, other_slug) in existing {
        if other_name == name {
            return Err(IpamError::DuplicateKey(format!("{} named '{}' already exists", kind, name)));
        }
        if other_slug == slug {
            return Err(IpamError::DuplicateKey(format!("{} with slug '{}' already exists", kind, slug)));
        }
    }
    Ok(())
}

fn sorted_by_name<T: Clone>(records: &HashMap<Uuid, T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut out: Vec<T> = records.values().cloned().collect();
    out.sort_by(|a, b| name(a).cmp(name(b)));
    out
}

impl IpamStore {
    // RIRs

    /// Register an RIR; name and slug are unique
    pub async fn create_rir(&self, request: NewRir) -> Result<Rir, IpamError> {
        let rir = {
            let mut state = self.write().await;
            check_unique_name(
                state.rirs.values().map(|r| (r.name.as_str(), r.slug.as_str())),
                "RIR",
                &request.name,
                &request.slug,
            )?;

            let now = Utc::now();
            let rir = Rir {
                id: Uuid::new_v4(),
                name: request.name,
                slug: request.slug,
                is_private: request.is_private,
                description: request.description,
                created: now,
                last_updated: now,
            };
            state.rirs.insert(rir.id, rir.clone());
            let event = AuditEvent::new(AuditAction::Create, "rirs", rir.id, None, Some(&rir));
            self.emit(event).await;
            rir
        };
        info!("Created RIR {} ({})", rir.name, rir.id);
        Ok(rir)
    }

    /// Fetch an RIR by id
    pub async fn get_rir(&self, id: Uuid) -> Result<Rir, IpamError> {
        self.read()
            .await
            .rirs
            .get(&id)
            .cloned()
            .ok_or_else(|| IpamError::NotFound(format!("RIR {} not found", id)))
    }

    /// All RIRs, ordered by name
    pub async fn list_rirs(&self) -> Vec<Rir> {
        sorted_by_name(&self.read().await.rirs, |r| r.name.as_str())
    }

    /// Delete an RIR that no aggregate references
    pub async fn delete_rir(&self, id: Uuid) -> Result<(), IpamError> {
        {
            let mut state = self.write().await;
            if !state.rirs.contains_key(&id) {
                return Err(IpamError::NotFound(format!("RIR {} not found", id)));
            }
            let in_use = state.aggregates.values().filter(|a| a.rir_id == id).count();
            if in_use > 0 {
                return Err(IpamError::ProtectedDelete(format!(
                    "RIR {} is referenced by {} aggregate(s)",
                    id, in_use
                )));
            }
            let old = state.rirs.remove(&id);
            let event = AuditEvent::new(AuditAction::Delete, "rirs", id, old.as_ref(), None);
            self.emit(event).await;
        }
        info!("Deleted RIR {}", id);
        Ok(())
    }

    // Roles

    /// Register a role; name and slug are unique
    pub async fn create_role(&self, request: NewRole) -> Result<Role, IpamError> {
        let role = {
            let mut state = self.write().await;
            check_unique_name(
                state.roles.values().map(|r| (r.name.as_str(), r.slug.as_str())),
                "Role",
                &request.name,
                &request.slug,
            )?;

            let now = Utc::now();
            let role = Role {
                id: Uuid::new_v4(),
                name: request.name,
                slug: request.slug,
                weight: request.weight,
                description: request.description,
                created: now,
                last_updated: now,
            };
            state.roles.insert(role.id, role.clone());
            let event = AuditEvent::new(AuditAction::Create, "roles", role.id, None, Some(&role));
            self.emit(event).await;
            role
        };
        info!("Created role {} ({})", role.name, role.id);
        Ok(role)
    }

    /// Roles ordered by weight, then name
    pub async fn list_roles(&self) -> Vec<Role> {
        let state = self.read().await;
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.name.cmp(&b.name)));
        roles
    }

    /// Delete a role that no prefix, range or VLAN references
    pub async fn delete_role(&self, id: Uuid) -> Result<(), IpamError> {
        {
            let mut state = self.write().await;
            if !state.roles.contains_key(&id) {
                return Err(IpamError::NotFound(format!("Role {} not found", id)));
            }
            let in_use = state.prefixes.values().filter(|p| p.role_id == Some(id)).count()
                + state.ranges.values().filter(|r| r.role_id == Some(id)).count()
                + state.vlans.values().filter(|v| v.role_id == Some(id)).count();
            if in_use > 0 {
                return Err(IpamError::ProtectedDelete(format!(
                    "Role {} is referenced by {} object(s)",
                    id, in_use
                )));
            }
            let old = state.roles.remove(&id);
            let event = AuditEvent::new(AuditAction::Delete, "roles", id, old.as_ref(), None);
            self.emit(event).await;
        }
        info!("Deleted role {}", id);
        Ok(())
    }

    // VRFs

    /// Create a VRF; a set route distinguisher is unique
    pub async fn create_vrf(&self, request: NewVrf) -> Result<Vrf, IpamError> {
        self.registry.ensure_optional(ObjectKind::Tenant, request.tenant_id)?;

        let vrf = {
            let mut state = self.write().await;
            check_unique_rd(&state, request.rd.as_deref(), None)?;

            let now = Utc::now();
            let vrf = Vrf {
                id: Uuid::new_v4(),
                name: request.name,
                rd: request.rd,
                tenant_id: request.tenant_id,
                enforce_unique: request.enforce_unique,
                description: request.description,
                created: now,
                last_updated: now,
            };
            state.vrfs.insert(vrf.id, vrf.clone());
            let event = AuditEvent::new(AuditAction::Create, "vrfs", vrf.id, None, Some(&vrf));
            self.emit(event).await;
            vrf
        };
        info!("Created VRF {} ({})", vrf.name, vrf.id);
        Ok(vrf)
    }

    /// Fetch a VRF by id
    pub async fn get_vrf(&self, id: Uuid) -> Result<Vrf, IpamError> {
        self.read()
            .await
            .vrfs
            .get(&id)
            .cloned()
            .ok_or_else(|| IpamError::NotFound(format!("VRF {} not found", id)))
    }

    /// All VRFs, ordered by name
    pub async fn list_vrfs(&self) -> Vec<Vrf> {
        sorted_by_name(&self.read().await.vrfs, |v| v.name.as_str())
    }

    /// Replace a VRF's attributes.
    ///
    /// Turning `enforce_unique` on is refused with `DuplicateKey` or `Overlap`
    /// while the VRF already holds duplicate addresses or overlapping ranges.
    pub async fn update_vrf(&self, id: Uuid, request: NewVrf) -> Result<Vrf, IpamError> {
        self.registry.ensure_optional(ObjectKind::Tenant, request.tenant_id)?;

        let vrf = {
            let mut state = self.write().await;
            let old = state
                .vrfs
                .get(&id)
                .cloned()
                .ok_or_else(|| IpamError::NotFound(format!("VRF {} not found", id)))?;
            check_unique_rd(&state, request.rd.as_deref(), Some(id))?;
            if request.enforce_unique && !old.enforce_unique {
                check_vrf_content_unique(&state, id)?;
            }

            let vrf = Vrf {
                name: request.name,
                rd: request.rd,
                tenant_id: request.tenant_id,
                enforce_unique: request.enforce_unique,
                description: request.description,
                last_updated: Utc::now(),
                ..old.clone()
            };
            state.vrfs.insert(id, vrf.clone());
            let event = AuditEvent::new(AuditAction::Update, "vrfs", id, Some(&old), Some(&vrf));
            self.emit(event).await;
            vrf
        };
        info!("Updated VRF {} ({})", vrf.name, vrf.id);
        Ok(vrf)
    }

    /// Delete a VRF that holds no prefixes, ranges or addresses
    pub async fn delete_vrf(&self, id: Uuid) -> Result<(), IpamError> {
        {
            let mut state = self.write().await;
            if !state.vrfs.contains_key(&id) {
                return Err(IpamError::NotFound(format!("VRF {} not found", id)));
            }
            let in_use = state.prefixes.values().filter(|p| p.vrf_id == Some(id)).count()
                + state.ranges.values().filter(|r| r.vrf_id == Some(id)).count()
                + state.addresses.values().filter(|a| a.vrf_id == Some(id)).count();
            if in_use > 0 {
                return Err(IpamError::ProtectedDelete(format!(
                    "VRF {} still holds {} prefix(es), range(s) or address(es)",
                    id, in_use
                )));
            }
            let old = state.vrfs.remove(&id);
            let event = AuditEvent::new(AuditAction::Delete, "vrfs", id, old.as_ref(), None);
            self.emit(event).await;
        }
        info!("Deleted VRF {}", id);
        Ok(())
    }
}

fn check_unique_rd(state: &IpamState, rd: Option<&str>, exclude: Option<Uuid>) -> Result<(), IpamError> {
    let Some(rd) = rd else {
        return Ok(());
    };
    let taken = state
        .vrfs
        .values()
        .any(|vrf| Some(vrf.id) != exclude && vrf.rd.as_deref() == Some(rd));
    if taken {
        return Err(IpamError::DuplicateKey(format!(
            "route distinguisher {} is already in use",
            rd
        )));
    }
    Ok(())
}

/// Existing content of a VRF must satisfy uniqueness before enforcement is enabled
fn check_vrf_content_unique(state: &IpamState, vrf_id: Uuid) -> Result<(), IpamError> {
    let mut seen = HashMap::new();
    for ip in state.addresses.values().filter(|ip| {
        ip.vrf_id == Some(vrf_id) && ip.status != IpAddressStatus::Deprecated
    }) {
        if let Some(other) = seen.insert(ip.host(), ip.id) {
            return Err(IpamError::DuplicateKey(format!(
                "addresses {} and {} share {}",
                other,
                ip.id,
                ip.host()
            )));
        }
    }

    let ranges: Vec<&IpRange> = state
        .ranges
        .values()
        .filter(|r| r.vrf_id == Some(vrf_id))
        .collect();
    for (i, a) in ranges.iter().enumerate() {
        for b in &ranges[i + 1..] {
            if a.span().intersects(&b.span()) {
                return Err(IpamError::Overlap(format!(
                    "ranges {} and {} overlap",
                    a.span(),
                    b.span()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpamConfig;

    fn store() -> IpamStore {
        IpamStore::new(IpamConfig::default())
    }

    #[tokio::test]
    async fn test_duplicate_rir_name_rejected() {
        let store = store();
        store
            .create_rir(NewRir {
                name: "RFC 1918".to_string(),
                slug: "rfc-1918".to_string(),
                is_private: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let err = store
            .create_rir(NewRir {
                name: "RFC 1918".to_string(),
                slug: "other".to_string(),
                ..Default::default()
            })
            .await;
        assert!(matches!(err, Err(IpamError::DuplicateKey(_))));
        assert_eq!(store.list_rirs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_vrf_rd_unique() {
        let store = store();
        store
            .create_vrf(NewVrf {
                name: "blue".to_string(),
                rd: Some("65000:1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = store
            .create_vrf(NewVrf {
                name: "red".to_string(),
                rd: Some("65000:1".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(err, Err(IpamError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_vrf_delete_is_protected() {
        let store = store();
        let vrf = store
            .create_vrf(NewVrf {
                name: "blue".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let prefix = store
            .create_prefix(NewPrefix {
                prefix: "10.0.0.0/24".to_string(),
                vrf_id: Some(vrf.id),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = store.delete_vrf(vrf.id).await;
        assert!(matches!(err, Err(IpamError::ProtectedDelete(_))));
        assert!(store.get_vrf(vrf.id).await.is_ok());

        store.delete_prefix(prefix.id).await.unwrap();
        store.delete_vrf(vrf.id).await.unwrap();
        assert!(matches!(store.get_vrf(vrf.id).await, Err(IpamError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rir_delete_is_protected() {
        let store = store();
        let rir = store
            .create_rir(NewRir {
                name: "ARIN".to_string(),
                slug: "arin".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_aggregate(NewAggregate {
                prefix: "203.0.113.0/24".to_string(),
                rir_id: rir.id,
                date_added: None,
                description: String::new(),
            })
            .await
            .unwrap();

        assert!(matches!(
            store.delete_rir(rir.id).await,
            Err(IpamError::ProtectedDelete(_))
        ));
    }

    #[tokio::test]
    async fn test_enabling_enforce_unique_checks_existing_content() {
        let store = store();
        let vrf = store
            .create_vrf(NewVrf {
                name: "lab".to_string(),
                enforce_unique: false,
                ..Default::default()
            })
            .await
            .unwrap();
        for _ in 0..2 {
            store
                .create_ip_address(NewIpAddress {
                    address: "192.0.2.10/24".to_string(),
                    vrf_id: Some(vrf.id),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let err = store
            .update_vrf(
                vrf.id,
                NewVrf {
                    name: "lab".to_string(),
                    enforce_unique: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(err, Err(IpamError::DuplicateKey(_))));
        assert!(!store.get_vrf(vrf.id).await.unwrap().enforce_unique);
    }
}
