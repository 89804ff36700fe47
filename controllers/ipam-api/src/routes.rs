use axum::{
    Router,
    extract::{Path, Query, State},
    routing::{delete, get, post},
};
use ipam_core::{Allocator, BlockRef, IpamStore};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::handlers::{addresses, aggregates, blocks, health, prefixes, ranges, vlans, vrfs};

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: IpamStore,
    pub allocator: Allocator,
}

impl AppState {
    pub fn new(store: IpamStore) -> Self {
        let allocator = Allocator::new(store.clone());
        Self { store, allocator }
    }
}

type SharedState = State<Arc<AppState>>;

/// Query endpoints shared by aggregates, prefixes and ranges
fn block_routes(base: &str, to_ref: fn(Uuid) -> BlockRef) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/{{id}}/usage", base),
            get(move |state: SharedState, Path(id): Path<Uuid>| blocks::usage(state, to_ref(id))),
        )
        .route(
            &format!("{}/{{id}}/children", base),
            get(move |state: SharedState, Path(id): Path<Uuid>| {
                blocks::children(state, to_ref(id))
            }),
        )
        .route(
            &format!("{}/{{id}}/parents", base),
            get(move |state: SharedState, Path(id): Path<Uuid>| blocks::parents(state, to_ref(id))),
        )
}

/// Address allocation endpoints shared by prefixes and ranges
fn allocation_routes(base: &str, to_ref: fn(Uuid) -> BlockRef) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/{{id}}/allocate", base),
            post(
                move |state: SharedState,
                      Path(id): Path<Uuid>,
                      body: axum::Json<blocks::AllocateBody>| {
                    blocks::allocate(state, to_ref(id), body)
                },
            ),
        )
        .route(
            &format!("{}/{{id}}/available-ips", base),
            get(
                move |state: SharedState,
                      Path(id): Path<Uuid>,
                      query: Query<blocks::AvailableQuery>| {
                    blocks::available_ips(state, to_ref(id), query)
                },
            ),
        )
}

pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health::health))
        // Aggregates and RIRs
        .route(
            "/api/ipam/rirs",
            get(vrfs::list_rirs).post(vrfs::create_rir),
        )
        .route(
            "/api/ipam/rirs/{id}",
            get(vrfs::get_rir).delete(vrfs::delete_rir),
        )
        .route(
            "/api/ipam/aggregates",
            get(aggregates::list_aggregates).post(aggregates::create_aggregate),
        )
        .route(
            "/api/ipam/aggregates/{id}",
            get(aggregates::get_aggregate)
                .put(aggregates::update_aggregate)
                .delete(aggregates::delete_aggregate),
        )
        .merge(block_routes("/api/ipam/aggregates", BlockRef::Aggregate))
        // VRFs and roles
        .route(
            "/api/ipam/vrfs",
            get(vrfs::list_vrfs).post(vrfs::create_vrf),
        )
        .route(
            "/api/ipam/vrfs/{id}",
            get(vrfs::get_vrf)
                .put(vrfs::update_vrf)
                .delete(vrfs::delete_vrf),
        )
        .route(
            "/api/ipam/roles",
            get(vrfs::list_roles).post(vrfs::create_role),
        )
        .route("/api/ipam/roles/{id}", delete(vrfs::delete_role))
        // Prefixes
        .route(
            "/api/ipam/prefixes",
            get(prefixes::list_prefixes).post(prefixes::create_prefix),
        )
        .route(
            "/api/ipam/prefixes/{id}",
            get(prefixes::get_prefix)
                .put(prefixes::update_prefix)
                .delete(prefixes::delete_prefix),
        )
        .route(
            "/api/ipam/prefixes/{id}/allocate-prefix",
            post(prefixes::allocate_prefix),
        )
        .merge(block_routes("/api/ipam/prefixes", BlockRef::Prefix))
        .merge(allocation_routes("/api/ipam/prefixes", BlockRef::Prefix))
        // IP ranges
        .route(
            "/api/ipam/ip-ranges",
            get(ranges::list_ranges).post(ranges::create_range),
        )
        .route(
            "/api/ipam/ip-ranges/{id}",
            get(ranges::get_range)
                .put(ranges::update_range)
                .delete(ranges::delete_range),
        )
        .merge(block_routes("/api/ipam/ip-ranges", BlockRef::Range))
        .merge(allocation_routes("/api/ipam/ip-ranges", BlockRef::Range))
        // IP addresses
        .route(
            "/api/ipam/ip-addresses",
            get(addresses::list_addresses).post(addresses::create_address),
        )
        .route(
            "/api/ipam/ip-addresses/{id}",
            get(addresses::get_address)
                .put(addresses::update_address)
                .delete(addresses::delete_address),
        )
        .route("/api/ipam/ip-addresses/{id}/release", post(addresses::release))
        .route("/api/ipam/ip-addresses/{id}/reserve", post(addresses::reserve))
        .route(
            "/api/ipam/ip-addresses/{id}/mark-conflict",
            post(addresses::mark_conflict),
        )
        .route(
            "/api/ipam/ip-addresses/{id}/nat-outside",
            get(addresses::nat_outside),
        )
        // VLANs
        .route(
            "/api/ipam/vlans",
            get(vlans::list_vlans).post(vlans::create_vlan),
        )
        .route(
            "/api/ipam/vlans/{id}",
            get(vlans::get_vlan)
                .put(vlans::update_vlan)
                .delete(vlans::delete_vlan),
        )
        // Longest-prefix match
        .route("/api/ipam/lookup", get(blocks::lookup))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
