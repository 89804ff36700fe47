use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use ipam_core::{NewVlan, Vlan, VlanFilter, VlanStatus};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{error::ApiError, routes::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct VlanQuery {
    pub site_id: Option<Uuid>,
    pub status: Option<VlanStatus>,
    pub q: Option<String>,
}

pub async fn list_vlans(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VlanQuery>,
) -> Json<Vec<Vlan>> {
    let filter = VlanFilter {
        site_id: query.site_id,
        status: query.status,
        search: query.q,
    };
    Json(state.store.query_vlans(&filter).await)
}

pub async fn create_vlan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewVlan>,
) -> Result<(StatusCode, Json<Vlan>), ApiError> {
    let vlan = state.store.create_vlan(req).await?;
    Ok((StatusCode::CREATED, Json(vlan)))
}

pub async fn get_vlan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vlan>, ApiError> {
    Ok(Json(state.store.get_vlan(id).await?))
}

pub async fn update_vlan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewVlan>,
) -> Result<Json<Vlan>, ApiError> {
    Ok(Json(state.store.update_vlan(id, req).await?))
}

pub async fn delete_vlan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_vlan(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
