use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ipam_core::{Aggregate, NewAggregate};
use std::sync::Arc;
use uuid::Uuid;

use crate::{error::ApiError, routes::AppState};

pub async fn list_aggregates(State(state): State<Arc<AppState>>) -> Json<Vec<Aggregate>> {
    Json(state.store.list_aggregates().await)
}

pub async fn create_aggregate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewAggregate>,
) -> Result<(StatusCode, Json<Aggregate>), ApiError> {
    let aggregate = state.store.create_aggregate(req).await?;
    Ok((StatusCode::CREATED, Json(aggregate)))
}

pub async fn get_aggregate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Aggregate>, ApiError> {
    Ok(Json(state.store.get_aggregate(id).await?))
}

pub async fn update_aggregate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewAggregate>,
) -> Result<Json<Aggregate>, ApiError> {
    Ok(Json(state.store.update_aggregate(id, req).await?))
}

pub async fn delete_aggregate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_aggregate(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
