use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use shared::tags::TagFilter;
use shared::types::{ServerAddress, ServerSummary};
use crate::master::MasterStats;
use crate::service::MasterHandle;
use super::hash::compute_hash;

#[derive(Clone)]
pub struct AppState {
    pub master: MasterHandle,
}

#[derive(Deserialize)]
pub struct ServerQuery {
    /// Same syntax as the `TA` field of a GET, e.g. `open,-dev`
    pub tags: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/servers", get(get_servers))
        .route("/v1/servers/hash", get(get_hash))
        .route("/v1/servers/:address", get(get_server))
        .route("/v1/stats", get(get_stats))
        .with_state(state)
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    tracing::error!("Failed to query master: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn get_servers(
    State(state): State<AppState>,
    Query(params): Query<ServerQuery>,
) -> Result<Json<Vec<ServerSummary>>, StatusCode> {
    let filter = params
        .tags
        .as_deref()
        .map(TagFilter::parse)
        .unwrap_or_default();

    state
        .master
        .snapshot(filter)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn get_hash(State(state): State<AppState>) -> Result<String, StatusCode> {
    let servers = state
        .master
        .snapshot(TagFilter::default())
        .await
        .map_err(internal_error)?;
    Ok(compute_hash(&servers))
}

async fn get_server(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ServerSummary>, StatusCode> {
    let address = ServerAddress::parse(&address).map_err(|_| StatusCode::BAD_REQUEST)?;
    state
        .master
        .get_one(address)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<MasterStats>, StatusCode> {
    state
        .master
        .stats()
        .await
        .map(Json)
        .map_err(internal_error)
}
