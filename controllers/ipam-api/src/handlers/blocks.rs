//! Endpoints shared by aggregates, prefixes and ranges

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use ipam_core::{AllocateRequest, Block, BlockRef, Cidr, IpAddress, Usage};
use serde::Deserialize;
use std::sync::Arc;

use super::parse_vrf_scope;
use crate::{error::ApiError, routes::AppState};

const DEFAULT_AVAILABLE_LIMIT: usize = 50;

/// Allocation request; `address` picks a specific address instead of the next free one
#[derive(Debug, Default, Deserialize)]
pub struct AllocateBody {
    pub address: Option<String>,
    #[serde(flatten)]
    pub request: AllocateRequest,
}

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub address: String,
    pub vrf: Option<String>,
}

pub async fn usage(
    State(state): State<Arc<AppState>>,
    block: BlockRef,
) -> Result<Json<Usage>, ApiError> {
    Ok(Json(state.store.usage(block).await?))
}

pub async fn children(
    State(state): State<Arc<AppState>>,
    block: BlockRef,
) -> Result<Json<Vec<Block>>, ApiError> {
    Ok(Json(state.store.children(block).await?))
}

pub async fn parents(
    State(state): State<Arc<AppState>>,
    block: BlockRef,
) -> Result<Json<Vec<Block>>, ApiError> {
    Ok(Json(state.store.parents(block).await?))
}

pub async fn allocate(
    State(state): State<Arc<AppState>>,
    block: BlockRef,
    Json(body): Json<AllocateBody>,
) -> Result<(StatusCode, Json<IpAddress>), ApiError> {
    let address = match body.address {
        Some(text) => {
            let ip = Cidr::parse(&text)?.ip();
            state.allocator.allocate_specific(block, ip, body.request).await?
        }
        None => state.allocator.allocate_next(block, body.request).await?,
    };
    Ok((StatusCode::CREATED, Json(address)))
}

pub async fn available_ips(
    State(state): State<Arc<AppState>>,
    block: BlockRef,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<Cidr>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_AVAILABLE_LIMIT);
    Ok(Json(state.allocator.available_ips(block, limit).await?))
}

/// Blocks containing an address, most specific first
pub async fn lookup(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Vec<Block>>, ApiError> {
    let ip = Cidr::parse(&query.address)?.ip();
    let vrf = parse_vrf_scope(query.vrf.as_deref())?.and_then(|scope| scope.vrf_id());
    Ok(Json(state.store.what_contains(ip, vrf).await))
}
