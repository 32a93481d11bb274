//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::game::map::{MapInfo, Tile};
use crate::util::time::uptime_secs;
use crate::ws::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    Router::new()
        .route("/health", get(health_handler))
        .route("/maps", get(maps_handler))
        .route("/api/maps", get(maps_handler))
        .route("/maps/:id", get(map_handler))
        .route("/maps/:id/tiles", get(map_tiles_handler))
        .route("/maps/:id/tiles/:x/:y", get(tile_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `*` allows any origin; otherwise a comma-separated allow list
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed_origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    connected_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.rooms.room_count(),
        connected_players: state.rooms.member_count(),
    })
}

// ============================================================================
// Map catalog
// ============================================================================

async fn maps_handler(State(state): State<AppState>) -> Json<Vec<MapInfo>> {
    Json(state.maps.available().to_vec())
}

async fn map_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MapInfo>, AppError> {
    state
        .maps
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("map {id}")))
}

/// Full tile grid of a catalog map, one array per column
async fn map_tiles_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Vec<Tile>>>, AppError> {
    let map = state
        .maps
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("map {id}")))?;
    Ok(Json(map.descriptor().matrix()))
}

#[derive(Serialize)]
struct TileResponse {
    x: u32,
    y: u32,
    tile: Tile,
}

async fn tile_handler(
    State(state): State<AppState>,
    Path((id, x, y)): Path<(String, u32, u32)>,
) -> Result<Json<TileResponse>, AppError> {
    let map = state
        .maps
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("map {id}")))?;
    let tile = map
        .descriptor()
        .checked_tile_at(x, y)
        .ok_or_else(|| AppError::NotFound(format!("tile ({x}, {y}) of {id}")))?;
    Ok(Json(TileResponse { x, y, tile }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
