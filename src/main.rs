//! SeatSense Server - Venue Seat Occupancy Streaming
//!
//! Main entry point for the occupancy server.

use seatsense_server::{
    detection_loop::DetectionLoop,
    frame_source::{self, FrameSource, HttpStream, StillPool},
    occupancy_state::OccupancyState,
    realtime_hub::RealtimeHub,
    region_catalog::RegionCatalog,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seatsense_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SeatSense Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        seat_labels = %config.seat_labels_path.display(),
        reference_image = %config.reference_image_path.display(),
        stream_url = ?config.stream_url,
        detect_interval_sec = config.detect_interval_sec,
        "Configuration loaded"
    );

    // Load the seat catalog; the process must not start without one
    let catalog = Arc::new(RegionCatalog::load(&config.seat_labels_path)?);
    tracing::info!(seats = catalog.len(), "Region catalog loaded");

    // Load and validate the reference frame; region coordinates live in its
    // pixel space
    let reference = Arc::new(frame_source::load_grayscale(&config.reference_image_path).await?);
    catalog.validate_bounds(reference.width(), reference.height())?;
    tracing::info!(
        width = reference.width(),
        height = reference.height(),
        "Reference image loaded"
    );

    // Pick the candidate frame source
    let source: Box<dyn FrameSource> = match &config.stream_url {
        Some(url) => {
            tracing::info!(url = %url, "Streaming mode (HTTP frame stream)");
            Box::new(HttpStream::new(url.clone(), config.temp_dir.clone())?)
        }
        None => {
            let mut pool = StillPool::new(&config.still_pool_dir)?;
            pool.select(config.still_index)?;
            tracing::info!(
                dir = %config.still_pool_dir.display(),
                pool_size = pool.len(),
                pinned = ?config.still_index,
                "Polling mode (still pool)"
            );
            Box::new(pool)
        }
    };

    // Initialize components
    let occupancy = Arc::new(OccupancyState::new());
    let realtime = Arc::new(RealtimeHub::new());

    let detector = Arc::new(DetectionLoop::new(
        reference,
        catalog.clone(),
        config.classifier_config(),
        source,
        occupancy.clone(),
        realtime.clone(),
        config.tick_interval(),
        config.cycle_timeout(),
    ));

    // Create application state
    let state = AppState {
        config: config.clone(),
        catalog,
        occupancy,
        realtime,
        detector: detector.clone(),
    };

    // Start the detection loop
    detector.start().await;
    tracing::info!("Detection loop started");

    // Create router
    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cancel the loop cleanly; an in-flight cycle's result is discarded
    detector.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
