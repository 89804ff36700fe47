//! Request handlers, one module per resource

pub mod addresses;
pub mod aggregates;
pub mod blocks;
pub mod health;
pub mod prefixes;
pub mod ranges;
pub mod vlans;
pub mod vrfs;

use crate::error::ApiError;
use ipam_core::VrfScope;
use uuid::Uuid;

/// Parse a `vrf` query value: `global` (or `null`) for the global table, else a VRF id
pub(crate) fn parse_vrf_scope(value: Option<&str>) -> Result<Option<VrfScope>, ApiError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some("global" | "null") => Ok(Some(VrfScope::Global)),
        Some(id) => id
            .parse::<Uuid>()
            .map(|id| Some(VrfScope::Vrf(id)))
            .map_err(|_| ApiError::BadRequest(format!("'{}' is not a VRF id", id))),
    }
}
