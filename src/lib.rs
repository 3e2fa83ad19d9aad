//! SeatSense Server Library
//!
//! Venue seat occupancy detection and streaming.
//!
//! ## Architecture (9 Components)
//!
//! 1. RegionCatalog - Seat label -> region annotations (SSoT, startup-loaded)
//! 2. FrameAligner - Homography alignment of live frames onto the reference
//! 3. RegionClassifier - Edge density + structural similarity per seat
//! 4. OccupancyEngine - One detection pass over the full catalog
//! 5. OccupancyState - Process-wide last snapshot (single writer)
//! 6. FrameSource - Still pool (polling) / HTTP stream (streaming) capture
//! 7. DetectionLoop - Periodic detection and publishing
//! 8. RealtimeHub - WebSocket distribution
//! 9. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - The reference image is the fixed coordinate frame for all regions
//! - A detection cycle yields a complete snapshot or a typed failure
//! - One cycle in flight at a time; a bad cycle never kills the loop

pub mod detection_loop;
pub mod error;
pub mod frame_aligner;
pub mod frame_source;
pub mod models;
pub mod occupancy_engine;
pub mod occupancy_state;
pub mod realtime_hub;
pub mod region_catalog;
pub mod region_classifier;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
