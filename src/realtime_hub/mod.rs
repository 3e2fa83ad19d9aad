//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management (register/unregister)
//! - Broadcasting occupancy updates to all connected subscribers
//!
//! The hub is an external collaborator from the detection core's point of
//! view: the loop only calls `broadcast` and never holds other locks across
//! the call. A send failure to one slow client never blocks the rest.

use crate::occupancy_engine::{OccupancySnapshot, SeatEntry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// A new occupancy snapshot was computed
    OccupancyUpdate(OccupancyUpdateMessage),
    /// Detector lifecycle notification (started/stopped)
    DetectorStatus(DetectorStatusMessage),
}

/// Occupancy update payload: both the flat snapshot and the grouped view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyUpdateMessage {
    /// Seat label -> occupied
    pub seats: BTreeMap<String, bool>,
    /// Row -> seats ordered by numeric seat index
    pub rows: BTreeMap<String, Vec<SeatEntry>>,
    /// Capture timestamp (ISO8601)
    pub captured_at: String,
}

impl OccupancyUpdateMessage {
    /// Build the outbound payload from a snapshot
    pub fn from_snapshot(snapshot: &OccupancySnapshot) -> Self {
        Self {
            seats: snapshot.seats.clone(),
            rows: snapshot.grouped(),
            captured_at: snapshot.captured_at.to_rfc3339(),
        }
    }
}

/// Detector status payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorStatusMessage {
    pub running: bool,
    pub mode: String,
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Broadcast message to all clients
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let connections = self.connections.read().await;
        tracing::debug!(client_count = connections.len(), "Sending to connected clients");

        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
            }
        }
    }

    /// Send a message to one client (used to replay the last snapshot to a
    /// subscriber that missed prior broadcasts)
    pub async fn send_to(&self, id: &Uuid, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let connections = self.connections.read().await;
        if let Some(conn) = connections.get(id) {
            if let Err(e) = conn.tx.send(json) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
            }
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}
