//! DetectionLoop - Periodic Detection and Publishing
//!
//! ## Responsibilities
//!
//! - Drive one detection cycle per tick, strictly sequentially
//! - Store each successful snapshot in the shared occupancy state
//! - Broadcast updates through the RealtimeHub
//!
//! A failed cycle is logged and skipped; the last snapshot is never replaced
//! with partial data and the loop never terminates on a bad cycle. Only an
//! explicit `stop` (checked at every tick) ends the loop.

use crate::error::{Error, Result};
use crate::frame_source::FrameSource;
use crate::occupancy_engine::{self, OccupancySnapshot};
use crate::occupancy_state::OccupancyState;
use crate::realtime_hub::{
    DetectorStatusMessage, HubMessage, OccupancyUpdateMessage, RealtimeHub,
};
use crate::region_catalog::RegionCatalog;
use crate::region_classifier::ClassifierConfig;
use image::GrayImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::interval;

/// DetectionLoop instance
pub struct DetectionLoop {
    reference: Arc<GrayImage>,
    catalog: Arc<RegionCatalog>,
    classifier_config: ClassifierConfig,
    frame_source: Mutex<Box<dyn FrameSource>>,
    mode: &'static str,
    occupancy_state: Arc<OccupancyState>,
    realtime_hub: Arc<RealtimeHub>,
    tick_interval: Duration,
    cycle_timeout: Duration,
    running: Arc<RwLock<bool>>,
}

impl DetectionLoop {
    /// Create new DetectionLoop
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reference: Arc<GrayImage>,
        catalog: Arc<RegionCatalog>,
        classifier_config: ClassifierConfig,
        frame_source: Box<dyn FrameSource>,
        occupancy_state: Arc<OccupancyState>,
        realtime_hub: Arc<RealtimeHub>,
        tick_interval: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        let mode = frame_source.mode();
        Self {
            reference,
            catalog,
            classifier_config,
            frame_source: Mutex::new(frame_source),
            mode,
            occupancy_state,
            realtime_hub,
            tick_interval,
            cycle_timeout,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Whether the loop task is active
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Source mode name ("polling" or "streaming")
    pub fn mode(&self) -> &'static str {
        self.mode
    }

    /// Start the detection loop task
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Detection loop already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            mode = self.mode,
            interval_ms = self.tick_interval.as_millis() as u64,
            seats = self.catalog.len(),
            "Starting detection loop"
        );

        self.realtime_hub
            .broadcast(HubMessage::DetectorStatus(DetectorStatusMessage {
                running: true,
                mode: self.mode.to_string(),
            }))
            .await;

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(this.tick_interval);

            loop {
                ticker.tick().await;

                // Cancellation point: checked once per tick
                {
                    let is_running = this.running.read().await;
                    if !*is_running {
                        break;
                    }
                }

                match this.run_once().await {
                    Ok(snapshot) => {
                        tracing::info!(
                            seats = snapshot.seats.len(),
                            occupied = snapshot.occupied_count(),
                            "Detection cycle complete"
                        );
                    }
                    Err(e) => {
                        // Recoverable by design: skip the cycle, keep the
                        // last snapshot, try again on the next tick
                        tracing::warn!(
                            kind = e.kind(),
                            error = %e,
                            "Detection cycle failed"
                        );
                    }
                }
            }

            tracing::info!("Detection loop stopped");
        });
    }

    /// Stop the detection loop task
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        tracing::info!("Stopping detection loop");

        self.realtime_hub
            .broadcast(HubMessage::DetectorStatus(DetectorStatusMessage {
                running: false,
                mode: self.mode.to_string(),
            }))
            .await;
    }

    /// Run one detection cycle: acquire a frame, compute occupancy, publish.
    ///
    /// Returns the published snapshot. On any error the shared state is left
    /// untouched and nothing is broadcast.
    pub async fn run_once(&self) -> Result<OccupancySnapshot> {
        let candidate = {
            let mut source = self.frame_source.lock().await;
            source.next_frame().await?
        };

        let reference = self.reference.clone();
        let catalog = self.catalog.clone();
        let config = self.classifier_config;

        let compute = tokio::task::spawn_blocking(move || {
            occupancy_engine::compute_occupancy(&reference, &candidate, &catalog, &config)
        });

        // An overrun cycle keeps running on the blocking pool, but its result
        // is discarded and never published.
        let snapshot = match tokio::time::timeout(self.cycle_timeout, compute).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(Error::Detection(format!("cycle task failed: {}", join_err)))
            }
            Err(_) => {
                return Err(Error::Detection(format!(
                    "cycle exceeded {}s timeout",
                    self.cycle_timeout.as_secs()
                )))
            }
        };

        self.occupancy_state.publish(snapshot.clone()).await;
        self.realtime_hub
            .broadcast(HubMessage::OccupancyUpdate(
                OccupancyUpdateMessage::from_snapshot(&snapshot),
            ))
            .await;

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::Luma;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted source: pops pre-loaded results, then keeps failing once the
    /// script is exhausted
    struct ScriptedSource {
        frames: VecDeque<Result<GrayImage>>,
        attempts: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Result<GrayImage>>, attempts: Arc<AtomicUsize>) -> Self {
            Self {
                frames: frames.into(),
                attempts,
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Result<GrayImage> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.frames
                .pop_front()
                .unwrap_or_else(|| Err(Error::FrameSource("script exhausted".to_string())))
        }

        fn mode(&self) -> &'static str {
            "polling"
        }
    }

    /// Deterministic blocky frame with enough corners to align
    fn textured_frame(width: u32, height: u32) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        let mut state: u32 = 0x1234_5678;
        for y in (0..height).step_by(10) {
            for x in (0..width).step_by(10) {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let v = (state % 256) as u8;
                for dy in 0..10.min(height - y) {
                    for dx in 0..10.min(width - x) {
                        img.put_pixel(x + dx, y + dy, Luma([v]));
                    }
                }
            }
        }
        img
    }

    fn test_catalog() -> Arc<RegionCatalog> {
        let json = serde_json::json!({
            "annotations": [
                {"attributes": {"Label": "A1"}, "bbox": [40, 40, 30, 30]},
            ]
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seat_labels.json");
        std::fs::write(&path, json.to_string()).unwrap();
        Arc::new(RegionCatalog::load(&path).unwrap())
    }

    fn make_loop(
        frames: Vec<Result<GrayImage>>,
        attempts: Arc<AtomicUsize>,
        reference: GrayImage,
        tick_ms: u64,
    ) -> (Arc<DetectionLoop>, Arc<OccupancyState>, Arc<RealtimeHub>) {
        let state = Arc::new(OccupancyState::new());
        let hub = Arc::new(RealtimeHub::new());
        let loop_ = Arc::new(DetectionLoop::new(
            Arc::new(reference),
            test_catalog(),
            ClassifierConfig::default(),
            Box::new(ScriptedSource::new(frames, attempts)),
            state.clone(),
            hub.clone(),
            Duration::from_millis(tick_ms),
            Duration::from_secs(30),
        ));
        (loop_, state, hub)
    }

    #[tokio::test]
    async fn test_successful_cycle_publishes_and_broadcasts() {
        let frame = textured_frame(200, 150);
        let attempts = Arc::new(AtomicUsize::new(0));
        let (loop_, state, hub) =
            make_loop(vec![Ok(frame.clone())], attempts, frame, 1000);

        let (_id, mut rx) = hub.register().await;

        let snapshot = loop_.run_once().await.unwrap();
        assert_eq!(snapshot.seats.len(), 1);
        assert!(snapshot.seats.contains_key("A1"));

        let stored = state.latest().await.unwrap();
        assert_eq!(stored.seats, snapshot.seats);

        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("occupancy_update"));
    }

    #[tokio::test]
    async fn test_frame_source_error_leaves_state_untouched() {
        let frame = textured_frame(200, 150);
        let attempts = Arc::new(AtomicUsize::new(0));
        let (loop_, state, _hub) = make_loop(
            vec![
                Ok(frame.clone()),
                Err(Error::FrameSource("camera offline".to_string())),
                Ok(frame.clone()),
            ],
            attempts,
            frame,
            1000,
        );

        let first = loop_.run_once().await.unwrap();

        let err = loop_.run_once().await.unwrap_err();
        assert!(matches!(err, Error::FrameSource(_)));
        let after_failure = state.latest().await.unwrap();
        assert_eq!(after_failure.captured_at, first.captured_at);

        // The loop recovers on the next cycle
        let recovered = loop_.run_once().await.unwrap();
        assert_eq!(recovered.seats.len(), 1);
    }

    #[tokio::test]
    async fn test_loop_survives_failures_until_stopped() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (loop_, state, _hub) = make_loop(
            vec![Err(Error::FrameSource("down".to_string()))],
            attempts.clone(),
            textured_frame(200, 150),
            10,
        );

        loop_.start().await;
        assert!(loop_.is_running().await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        loop_.stop().await;
        assert!(!loop_.is_running().await);

        // Several cycles were attempted despite every one failing
        assert!(attempts.load(Ordering::SeqCst) >= 2);
        assert!(state.latest().await.is_none());
    }
}
