//! OccupancyEngine - One Detection Pass over the Full Catalog
//!
//! ## Responsibilities
//!
//! - Align the candidate frame onto the reference (reference frame is fixed)
//! - Classify every catalog region on the aligned pair
//! - Assemble a complete label -> occupied snapshot, or fail the whole cycle
//!
//! The engine is pure: it returns a typed result and never logs or retries.
//! A failure never produces a partially filled snapshot.

use crate::error::Result;
use crate::frame_aligner;
use crate::region_catalog::RegionCatalog;
use crate::region_classifier::{self, ClassifierConfig};
use chrono::{DateTime, Utc};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Occupancy of every seat in the catalog at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    /// Seat label -> occupied
    pub seats: BTreeMap<String, bool>,
    /// When the candidate frame was processed
    pub captured_at: DateTime<Utc>,
}

/// One seat in the grouped presentation view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatEntry {
    /// Seat index within the row (label minus its row character)
    pub seat: String,
    pub occupied: bool,
}

impl OccupancySnapshot {
    /// Number of occupied seats
    pub fn occupied_count(&self) -> usize {
        self.seats.values().filter(|&&v| v).count()
    }

    /// Grouped presentation view: rows keyed by the label's first character,
    /// seats ordered by the numeric value of the remaining characters
    /// ("A2" before "A10"). Pure projection of the flat snapshot.
    pub fn grouped(&self) -> BTreeMap<String, Vec<SeatEntry>> {
        let mut rows: BTreeMap<String, Vec<(u64, SeatEntry)>> = BTreeMap::new();

        for (label, &occupied) in &self.seats {
            let mut chars = label.chars();
            let Some(row) = chars.next() else {
                continue;
            };
            let seat: String = chars.collect();
            // Non-numeric seat indices sort after numeric ones, by label
            let order = seat.parse::<u64>().unwrap_or(u64::MAX);
            rows.entry(row.to_string())
                .or_default()
                .push((order, SeatEntry { seat, occupied }));
        }

        rows.into_iter()
            .map(|(row, mut seats)| {
                seats.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.seat.cmp(&b.1.seat)));
                (row, seats.into_iter().map(|(_, entry)| entry).collect())
            })
            .collect()
    }
}

/// Run one full detection pass: align, then classify every region.
///
/// Returns a snapshot with exactly one boolean per catalog label, or the
/// first error encountered — never a partial mapping.
pub fn compute_occupancy(
    reference: &GrayImage,
    candidate: &GrayImage,
    catalog: &RegionCatalog,
    config: &ClassifierConfig,
) -> Result<OccupancySnapshot> {
    let aligned = frame_aligner::align(reference, candidate)?;

    let mut seats = BTreeMap::new();
    for region in catalog.iter() {
        let occupied = region_classifier::classify(reference, &aligned, region, config)?;
        seats.insert(region.label.clone(), occupied);
    }

    Ok(OccupancySnapshot {
        seats,
        captured_at: Utc::now(),
    })
}
