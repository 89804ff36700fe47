use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use ipam_core::{
    AddressFilter, AllocationState, AssignedObject, Cidr, IpAddress, IpAddressStatus, NewIpAddress,
    ObjectKind,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::parse_vrf_scope;
use crate::{error::ApiError, routes::AppState};

/// Query parameters for listing IP addresses
#[derive(Debug, Default, Deserialize)]
pub struct AddressQuery {
    pub vrf: Option<String>,
    pub status: Option<IpAddressStatus>,
    pub state: Option<AllocationState>,
    /// Only addresses inside this network
    pub parent: Option<String>,
    pub assigned_object_type: Option<ObjectKind>,
    pub assigned_object_id: Option<Uuid>,
    /// Substring of the address, DNS name or MAC address
    pub q: Option<String>,
}

impl AddressQuery {
    fn into_filter(self) -> Result<AddressFilter, ApiError> {
        let assigned_object = match (self.assigned_object_type, self.assigned_object_id) {
            (Some(kind), Some(id)) => Some(AssignedObject { kind, id }),
            (None, None) => None,
            _ => {
                return Err(ApiError::BadRequest(
                    "assigned_object_type and assigned_object_id go together".to_string(),
                ));
            }
        };
        Ok(AddressFilter {
            vrf: parse_vrf_scope(self.vrf.as_deref())?,
            status: self.status,
            state: self.state,
            parent: self.parent.as_deref().map(Cidr::parse).transpose()?,
            assigned_object,
            search: self.q,
        })
    }
}

pub async fn list_addresses(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Vec<IpAddress>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.store.query_ip_addresses(&filter).await))
}

pub async fn create_address(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewIpAddress>,
) -> Result<(StatusCode, Json<IpAddress>), ApiError> {
    let address = state.store.create_ip_address(req).await?;
    Ok((StatusCode::CREATED, Json(address)))
}

pub async fn get_address(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<IpAddress>, ApiError> {
    Ok(Json(state.store.get_ip_address(id).await?))
}

pub async fn update_address(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewIpAddress>,
) -> Result<Json<IpAddress>, ApiError> {
    Ok(Json(state.store.update_ip_address(id, req).await?))
}

pub async fn delete_address(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_ip_address(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<IpAddress>, ApiError> {
    Ok(Json(state.allocator.release(id).await?))
}

pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<IpAddress>, ApiError> {
    Ok(Json(state.allocator.reserve(id).await?))
}

pub async fn mark_conflict(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<IpAddress>, ApiError> {
    Ok(Json(state.allocator.mark_conflict(id).await?))
}

/// Outside addresses NATed to this one
pub async fn nat_outside(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<IpAddress>>, ApiError> {
    Ok(Json(state.store.nat_outside(id).await?))
}
