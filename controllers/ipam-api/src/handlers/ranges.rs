use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use ipam_core::{IpAddressStatus, IpRange, NewIpRange, RangeFilter};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::parse_vrf_scope;
use crate::{error::ApiError, routes::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub site_id: Option<Uuid>,
    pub vrf: Option<String>,
    pub status: Option<IpAddressStatus>,
}

pub async fn list_ranges(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<IpRange>>, ApiError> {
    let filter = RangeFilter {
        site_id: query.site_id,
        vrf: parse_vrf_scope(query.vrf.as_deref())?,
        status: query.status,
    };
    Ok(Json(state.store.query_ip_ranges(&filter).await))
}

pub async fn create_range(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewIpRange>,
) -> Result<(StatusCode, Json<IpRange>), ApiError> {
    let range = state.store.create_ip_range(req).await?;
    Ok((StatusCode::CREATED, Json(range)))
}

pub async fn get_range(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<IpRange>, ApiError> {
    Ok(Json(state.store.get_ip_range(id).await?))
}

pub async fn update_range(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewIpRange>,
) -> Result<Json<IpRange>, ApiError> {
    Ok(Json(state.store.update_ip_range(id, req).await?))
}

pub async fn delete_range(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_ip_range(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
