//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};

use crate::error::{Error, Result};
use crate::models::ApiResponse;
use crate::realtime_hub::{HubMessage, OccupancyUpdateMessage};
use crate::region_catalog::Region;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Occupancy (on-demand last snapshot)
        .route("/api/occupancy", get(get_occupancy))
        .route("/api/occupancy/grouped", get(get_occupancy_grouped))
        // Seat regions
        .route("/api/regions", get(list_regions))
        // Detector lifecycle
        .route("/api/detector/start", post(start_detector))
        .route("/api/detector/stop", post(stop_detector))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

/// GET /api/occupancy - flat label -> occupied view of the last snapshot
async fn get_occupancy(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<OccupancyUpdateMessage>>> {
    let snapshot = state
        .occupancy
        .latest()
        .await
        .ok_or_else(|| Error::NotFound("no occupancy snapshot computed yet".to_string()))?;

    Ok(Json(ApiResponse::success(
        OccupancyUpdateMessage::from_snapshot(&snapshot),
    )))
}

/// GET /api/occupancy/grouped - rows keyed by the label's first character
async fn get_occupancy_grouped(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let snapshot = state
        .occupancy
        .latest()
        .await
        .ok_or_else(|| Error::NotFound("no occupancy snapshot computed yet".to_string()))?;

    Ok(Json(ApiResponse::success(snapshot.grouped())))
}

/// GET /api/regions - the loaded seat catalog
async fn list_regions(State(state): State<AppState>) -> impl IntoResponse {
    let regions: Vec<Region> = state.catalog.iter().cloned().collect();
    Json(ApiResponse::success(regions))
}

/// POST /api/detector/start
async fn start_detector(State(state): State<AppState>) -> impl IntoResponse {
    state.detector.start().await;
    Json(ApiResponse::success("detector started"))
}

/// POST /api/detector/stop
async fn stop_detector(State(state): State<AppState>) -> impl IntoResponse {
    state.detector.stop().await;
    Json(ApiResponse::success("detector stopped"))
}

// ========================================
// WebSocket Handler
// ========================================

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Register with RealtimeHub
    let (conn_id, mut rx) = state.realtime.register().await;

    tracing::info!(connection_id = %conn_id, "WebSocket client connected");

    // Replay the last snapshot so a late subscriber is not blank until the
    // next detection cycle
    if let Some(snapshot) = state.occupancy.latest().await {
        state
            .realtime
            .send_to(
                &conn_id,
                HubMessage::OccupancyUpdate(OccupancyUpdateMessage::from_snapshot(&snapshot)),
            )
            .await;
    }

    // Forward messages from hub to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages (ping/pong, close)
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Ping(data)) => {
                    // Pong is handled automatically by axum
                    tracing::trace!("Received ping: {:?}", data);
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
        conn_id
    });

    // Wait for either task to complete
    let conn_id = tokio::select! {
        _ = send_task => conn_id,
        result = recv_task => result.unwrap_or(conn_id),
    };

    // Unregister from hub
    state.realtime.unregister(&conn_id).await;
}
