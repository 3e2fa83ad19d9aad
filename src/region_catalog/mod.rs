//! RegionCatalog - Seat Region Annotations
//!
//! ## Responsibilities
//!
//! - Load seat label -> bounding box mapping from the annotation file
//! - Validate entries at startup (an incomplete catalog silently drops seats)
//! - Read-only access for the rest of the process lifetime

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One seat region in reference-image pixel space
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Region {
    pub label: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Raw annotation file format: `{"annotations": [{"attributes": {"Label": ..}, "bbox": [x,y,w,h]}]}`
#[derive(Debug, Deserialize)]
struct AnnotationFile {
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    attributes: AnnotationAttributes,
    bbox: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct AnnotationAttributes {
    #[serde(rename = "Label")]
    label: Option<String>,
}

/// Immutable catalog of seat regions, keyed by label
#[derive(Debug, Clone)]
pub struct RegionCatalog {
    regions: BTreeMap<String, Region>,
}

impl RegionCatalog {
    /// Load the catalog from an annotation JSON file.
    ///
    /// Malformed entries (missing label, non-4-tuple bbox, non-positive
    /// dimensions, duplicate labels) fail the whole load.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::CatalogLoad(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file: AnnotationFile = serde_json::from_str(&raw)
            .map_err(|e| Error::CatalogLoad(format!("invalid annotation JSON: {}", e)))?;

        Self::from_annotations(file.annotations)
    }

    fn from_annotations(annotations: Vec<Annotation>) -> Result<Self> {
        let mut regions = BTreeMap::new();

        for (idx, ann) in annotations.into_iter().enumerate() {
            let label = ann.attributes.label.ok_or_else(|| {
                Error::CatalogLoad(format!("annotation #{} has no Label attribute", idx))
            })?;

            if ann.bbox.len() != 4 {
                return Err(Error::CatalogLoad(format!(
                    "annotation '{}' has a {}-element bbox, expected [x, y, w, h]",
                    label,
                    ann.bbox.len()
                )));
            }
            let (x, y, w, h) = (ann.bbox[0], ann.bbox[1], ann.bbox[2], ann.bbox[3]);
            if x < 0 || y < 0 || w <= 0 || h <= 0 {
                return Err(Error::CatalogLoad(format!(
                    "annotation '{}' has invalid bbox [{}, {}, {}, {}]",
                    label, x, y, w, h
                )));
            }

            let region = Region {
                label: label.clone(),
                x: x as u32,
                y: y as u32,
                width: w as u32,
                height: h as u32,
            };

            if regions.insert(label.clone(), region).is_some() {
                return Err(Error::CatalogLoad(format!("duplicate label '{}'", label)));
            }
        }

        if regions.is_empty() {
            return Err(Error::CatalogLoad("catalog contains no regions".to_string()));
        }

        Ok(Self { regions })
    }

    /// Check that every region lies within the reference image bounds.
    ///
    /// Region coordinates are defined in the reference frame, so this runs
    /// at startup once the reference image dimensions are known.
    pub fn validate_bounds(&self, width: u32, height: u32) -> Result<()> {
        for region in self.regions.values() {
            let x1 = region.x as u64 + region.width as u64;
            let y1 = region.y as u64 + region.height as u64;
            if x1 > width as u64 || y1 > height as u64 {
                return Err(Error::CatalogLoad(format!(
                    "region '{}' ({},{} {}x{}) exceeds reference bounds {}x{}",
                    region.label, region.x, region.y, region.width, region.height, width, height
                )));
            }
        }
        Ok(())
    }

    /// Number of seats in the catalog
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterate regions in label order
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Look up a region by label
    pub fn get(&self, label: &str) -> Option<&Region> {
        self.regions.get(label)
    }

    /// All labels in order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(|s| s.as_str())
    }
}
