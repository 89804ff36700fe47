//! External object registries
//!
//! Sites, tenants and assignable equipment (interfaces, services) live outside
//! the IPAM core. The store only needs to know whether a referenced object
//! still exists, so each kind is resolved through a lookup function registered
//! here instead of a generic relation table.

use crate::error::IpamError;
use crate::models::{AssignedObject, ObjectKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Liveness check for one object kind
pub type LookupFn = Arc<dyn Fn(Uuid) -> bool + Send + Sync>;

/// Registry of per-kind lookup functions
#[derive(Clone, Default)]
pub struct ObjectRegistry {
    lookups: HashMap<ObjectKind, LookupFn>,
    /// Accept ids of kinds that have no lookup registered
    permissive: bool,
}

impl ObjectRegistry {
    /// Strict registry: references to kinds without a lookup are rejected
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that trusts references of kinds without a lookup
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            lookups: HashMap::new(),
            permissive: true,
        }
    }

    /// Register the lookup used for `kind`
    #[must_use]
    pub fn with_lookup<F>(mut self, kind: ObjectKind, lookup: F) -> Self
    where
        F: Fn(Uuid) -> bool + Send + Sync + 'static,
    {
        self.lookups.insert(kind, Arc::new(lookup));
        self
    }

    /// Whether the referenced object exists
    #[must_use]
    pub fn exists(&self, kind: ObjectKind, id: Uuid) -> bool {
        match self.lookups.get(&kind) {
            Some(lookup) => lookup(id),
            None => self.permissive,
        }
    }

    /// Fail with `NotFound` unless the referenced object exists
    pub fn ensure(&self, kind: ObjectKind, id: Uuid) -> Result<(), IpamError> {
        if self.exists(kind, id) {
            Ok(())
        } else {
            Err(IpamError::NotFound(format!("{} {} does not exist", kind, id)))
        }
    }

    /// Like [`ensure`](Self::ensure) for optional references
    pub fn ensure_optional(&self, kind: ObjectKind, id: Option<Uuid>) -> Result<(), IpamError> {
        match id {
            Some(id) => self.ensure(kind, id),
            None => Ok(()),
        }
    }

    /// Validate the target of an address binding
    pub fn ensure_assignable(&self, object: &AssignedObject) -> Result<(), IpamError> {
        if !object.kind.is_assignable() {
            return Err(IpamError::InvalidOperation(format!(
                "IP addresses cannot be assigned to a {}",
                object.kind
            )));
        }
        self.ensure(object.kind, object.id)
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("kinds", &self.lookups.keys().collect::<Vec<_>>())
            .field("permissive", &self.permissive)
            .finish()
    }
}
