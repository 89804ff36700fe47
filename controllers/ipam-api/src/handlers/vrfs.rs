//! VRFs, RIRs and roles

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ipam_core::{NewRir, NewRole, NewVrf, Rir, Role, Vrf};
use std::sync::Arc;
use uuid::Uuid;

use crate::{error::ApiError, routes::AppState};

pub async fn list_vrfs(State(state): State<Arc<AppState>>) -> Json<Vec<Vrf>> {
    Json(state.store.list_vrfs().await)
}

pub async fn create_vrf(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewVrf>,
) -> Result<(StatusCode, Json<Vrf>), ApiError> {
    let vrf = state.store.create_vrf(req).await?;
    Ok((StatusCode::CREATED, Json(vrf)))
}

pub async fn get_vrf(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vrf>, ApiError> {
    Ok(Json(state.store.get_vrf(id).await?))
}

pub async fn update_vrf(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewVrf>,
) -> Result<Json<Vrf>, ApiError> {
    Ok(Json(state.store.update_vrf(id, req).await?))
}

pub async fn delete_vrf(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_vrf(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_rirs(State(state): State<Arc<AppState>>) -> Json<Vec<Rir>> {
    Json(state.store.list_rirs().await)
}

pub async fn create_rir(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewRir>,
) -> Result<(StatusCode, Json<Rir>), ApiError> {
    let rir = state.store.create_rir(req).await?;
    Ok((StatusCode::CREATED, Json(rir)))
}

pub async fn get_rir(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Rir>, ApiError> {
    Ok(Json(state.store.get_rir(id).await?))
}

pub async fn delete_rir(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_rir(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_roles(State(state): State<Arc<AppState>>) -> Json<Vec<Role>> {
    Json(state.store.list_roles().await)
}

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewRole>,
) -> Result<(StatusCode, Json<Role>), ApiError> {
    let role = state.store.create_role(req).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_role(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
