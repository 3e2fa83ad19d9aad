//! Application state
//!
//! Holds all shared components and state

use crate::detection_loop::DetectionLoop;
use crate::occupancy_state::OccupancyState;
use crate::realtime_hub::RealtimeHub;
use crate::region_catalog::RegionCatalog;
use crate::region_classifier::ClassifierConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Seat annotation file (region catalog source)
    pub seat_labels_path: PathBuf,
    /// Reference "empty venue" image
    pub reference_image_path: PathBuf,
    /// Still pool directory (polling mode)
    pub still_pool_dir: PathBuf,
    /// Pin the pool to one still instead of random rotation
    pub still_index: Option<usize>,
    /// Camera snapshot endpoint; set => streaming mode
    pub stream_url: Option<String>,
    /// Temporary directory for staged frames
    pub temp_dir: PathBuf,
    /// Minimum mean edge density to flag "something present"
    pub edge_threshold: f64,
    /// Maximum structural similarity to flag "something changed"
    pub ssim_threshold: f64,
    /// Seconds between detection cycles
    pub detect_interval_sec: u64,
    /// Upper bound on one detection cycle
    pub cycle_timeout_sec: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let stream_url = std::env::var("STREAM_URL").ok();
        // Streaming pulls frames back-to-back; polling is more relaxed
        let default_interval = if stream_url.is_some() { 1 } else { 3 };

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            seat_labels_path: std::env::var("SEAT_LABELS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static/seat_labels.json")),
            reference_image_path: std::env::var("REFERENCE_IMAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static/empty-auditorium.png")),
            still_pool_dir: std::env::var("STILL_POOL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static/frames")),
            still_index: std::env::var("STILL_INDEX")
                .ok()
                .and_then(|v| v.parse().ok()),
            stream_url,
            temp_dir: std::env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/seatsense")),
            edge_threshold: std::env::var("EDGE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15.0),
            ssim_threshold: std::env::var("SSIM_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.45),
            detect_interval_sec: std::env::var("DETECT_INTERVAL_SEC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_interval),
            cycle_timeout_sec: std::env::var("CYCLE_TIMEOUT_SEC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

impl AppConfig {
    /// Classifier thresholds from this configuration
    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            edge_threshold: self.edge_threshold,
            ssim_threshold: self.ssim_threshold,
        }
    }

    /// Tick interval of the detection loop
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.detect_interval_sec.max(1))
    }

    /// Per-cycle timeout
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_sec.max(1))
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Seat region catalog (read-only after startup)
    pub catalog: Arc<RegionCatalog>,
    /// Process-wide last snapshot
    pub occupancy: Arc<OccupancyState>,
    /// RealtimeHub (WebSocket fan-out)
    pub realtime: Arc<RealtimeHub>,
    /// Detection loop handle
    pub detector: Arc<DetectionLoop>,
}
