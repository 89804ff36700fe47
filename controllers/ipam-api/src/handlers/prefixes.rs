use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use ipam_core::{AllocatePrefixRequest, NewPrefix, Prefix, PrefixFilter, PrefixStatus};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::parse_vrf_scope;
use crate::{error::ApiError, routes::AppState};

/// Query parameters for listing prefixes
#[derive(Debug, Default, Deserialize)]
pub struct PrefixQuery {
    pub site_id: Option<Uuid>,
    /// `global` or a VRF id
    pub vrf: Option<String>,
    pub status: Option<PrefixStatus>,
    pub role_id: Option<Uuid>,
    pub is_pool: Option<bool>,
    pub q: Option<String>,
}

pub async fn list_prefixes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PrefixQuery>,
) -> Result<Json<Vec<Prefix>>, ApiError> {
    let filter = PrefixFilter {
        site_id: query.site_id,
        vrf: parse_vrf_scope(query.vrf.as_deref())?,
        status: query.status,
        role_id: query.role_id,
        is_pool: query.is_pool,
        search: query.q,
    };
    Ok(Json(state.store.query_prefixes(&filter).await))
}

pub async fn create_prefix(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewPrefix>,
) -> Result<(StatusCode, Json<Prefix>), ApiError> {
    let prefix = state.store.create_prefix(req).await?;
    Ok((StatusCode::CREATED, Json(prefix)))
}

pub async fn get_prefix(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Prefix>, ApiError> {
    Ok(Json(state.store.get_prefix(id).await?))
}

pub async fn update_prefix(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewPrefix>,
) -> Result<Json<Prefix>, ApiError> {
    Ok(Json(state.store.update_prefix(id, req).await?))
}

pub async fn delete_prefix(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_prefix(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Carve the next free child prefix of the requested length
pub async fn allocate_prefix(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AllocatePrefixRequest>,
) -> Result<(StatusCode, Json<Prefix>), ApiError> {
    let prefix = state.allocator.allocate_next_prefix(id, req).await?;
    Ok((StatusCode::CREATED, Json(prefix)))
}
