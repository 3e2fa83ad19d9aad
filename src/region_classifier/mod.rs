//! RegionClassifier - Occupied/Empty Decision per Seat Region
//!
//! ## Responsibilities
//!
//! - Edge density over the aligned candidate crop (Canny + sharpening kernel)
//! - Windowed structural similarity between reference and candidate crops
//! - Dual-threshold decision: both signals must indicate change
//!
//! Edge density alone rises under lighting/alignment noise and structural
//! drift alone lowers similarity without adding real edges, so a region is
//! flagged occupied only when both signals agree.

use crate::error::{Error, Result};
use crate::region_catalog::Region;
use image::imageops::crop_imm;
use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::filter::filter3x3;

/// Canny hysteresis thresholds on the 8-bit intensity scale
const CANNY_LOW: f32 = 200.0;
const CANNY_HIGH: f32 = 300.0;

/// Vertical-stroke sharpening kernel applied to the edge map before averaging
const EDGE_KERNEL: [f32; 9] = [-1.0, 2.0, -1.0, -1.0, 2.0, -1.0, -1.0, 2.0, -1.0];

/// SSIM stabilization constants for 8-bit data (K1=0.01, K2=0.03, L=255)
const SSIM_C1: f64 = 6.5025;
const SSIM_C2: f64 = 58.5225;

/// Classifier thresholds
#[derive(Debug, Clone, Copy)]
pub struct ClassifierConfig {
    /// Minimum mean edge density to flag "something present"
    pub edge_threshold: f64,
    /// Maximum structural similarity to flag "something changed"
    pub ssim_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 15.0,
            ssim_threshold: 0.45,
        }
    }
}

/// The two independent signals computed for one region
#[derive(Debug, Clone, Copy)]
pub struct RegionSignals {
    pub edge_density: f64,
    pub ssim: f64,
}

/// Classify one region of an aligned frame pair. `true` means occupied.
pub fn classify(
    reference: &GrayImage,
    aligned_candidate: &GrayImage,
    region: &Region,
    config: &ClassifierConfig,
) -> Result<bool> {
    let signals = compute_signals(reference, aligned_candidate, region)?;
    Ok(is_occupied(&signals, config))
}

/// Dual-threshold decision rule. Both signals must independently indicate
/// change; either alone is insufficient.
pub fn is_occupied(signals: &RegionSignals, config: &ClassifierConfig) -> bool {
    signals.edge_density > config.edge_threshold && signals.ssim < config.ssim_threshold
}

/// Compute edge density and structural similarity for one region
pub fn compute_signals(
    reference: &GrayImage,
    aligned_candidate: &GrayImage,
    region: &Region,
) -> Result<RegionSignals> {
    let ref_crop = crop_region(reference, region)?;
    let cand_crop = crop_region(aligned_candidate, region)?;

    let edge_density = edge_density(&cand_crop);
    let ssim = ssim(&ref_crop, &cand_crop);

    Ok(RegionSignals { edge_density, ssim })
}

fn crop_region(image: &GrayImage, region: &Region) -> Result<GrayImage> {
    let (width, height) = image.dimensions();
    if region.x + region.width > width || region.y + region.height > height {
        return Err(Error::Detection(format!(
            "region '{}' exceeds frame bounds {}x{}",
            region.label, width, height
        )));
    }
    Ok(crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}

/// Mean intensity of the sharpened Canny edge map
fn edge_density(crop: &GrayImage) -> f64 {
    let edges = canny(crop, CANNY_LOW, CANNY_HIGH);
    let filtered = filter3x3::<Luma<u8>, f32, u8>(&edges, &EDGE_KERNEL);

    let sum: u64 = filtered.pixels().map(|p| p[0] as u64).sum();
    sum as f64 / (filtered.width() as u64 * filtered.height() as u64) as f64
}

/// Window size for SSIM: an odd number no larger than 7 and no larger than
/// the smaller crop side
pub fn derive_ssim_window(width: u32, height: u32) -> u32 {
    let mut win = width.min(height).min(7);
    if win % 2 == 0 {
        win -= 1;
    }
    win
}

/// Mean structural similarity over all full windows of the crop pair.
///
/// Uniform (unweighted) windows with unbiased variance, matching the usual
/// definition for 8-bit data. Result is in [-1, 1]; lower means more visual
/// difference.
fn ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let (width, height) = a.dimensions();
    let win = derive_ssim_window(width, height);
    let n = (win * win) as f64;
    let cov_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };

    let mut total = 0.0;
    let mut windows = 0u64;

    for wy in 0..=(height - win) {
        for wx in 0..=(width - win) {
            let mut sum_a = 0.0;
            let mut sum_b = 0.0;
            let mut sum_aa = 0.0;
            let mut sum_bb = 0.0;
            let mut sum_ab = 0.0;

            for y in wy..wy + win {
                for x in wx..wx + win {
                    let pa = a.get_pixel(x, y)[0] as f64;
                    let pb = b.get_pixel(x, y)[0] as f64;
                    sum_a += pa;
                    sum_b += pb;
                    sum_aa += pa * pa;
                    sum_bb += pb * pb;
                    sum_ab += pa * pb;
                }
            }

            let mu_a = sum_a / n;
            let mu_b = sum_b / n;
            let var_a = cov_norm * (sum_aa / n - mu_a * mu_a);
            let var_b = cov_norm * (sum_bb / n - mu_b * mu_b);
            let cov = cov_norm * (sum_ab / n - mu_a * mu_b);

            let numerator = (2.0 * mu_a * mu_b + SSIM_C1) * (2.0 * cov + SSIM_C2);
            let denominator = (mu_a * mu_a + mu_b * mu_b + SSIM_C1) * (var_a + var_b + SSIM_C2);
            total += numerator / denominator;
            windows += 1;
        }
    }

    total / windows as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    fn checker(width: u32, height: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        })
    }

    fn region(x: u32, y: u32, width: u32, height: u32) -> Region {
        Region {
            label: "A1".to_string(),
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn test_window_derivation_is_odd_and_bounded() {
        assert_eq!(derive_ssim_window(10, 4), 3);
        assert_eq!(derive_ssim_window(4, 10), 3);
        assert_eq!(derive_ssim_window(7, 7), 7);
        assert_eq!(derive_ssim_window(20, 8), 7);
        assert_eq!(derive_ssim_window(9, 5), 5);

        for side in 1..30 {
            let win = derive_ssim_window(side, 100);
            assert_eq!(win % 2, 1, "window for side {} is even", side);
            assert!(win <= side.max(1));
            assert!(win <= 7);
        }
    }

    #[test]
    fn test_identical_crops_score_as_empty() {
        let img = checker(64, 64, 8);
        let signals = compute_signals(&img, &img, &region(8, 8, 32, 32)).unwrap();

        assert!((signals.ssim - 1.0).abs() < 1e-9);
        assert!(!is_occupied(&signals, &ClassifierConfig::default()));
    }

    #[test]
    fn test_flat_region_has_zero_edge_density() {
        let img = flat(64, 64, 128);
        let signals = compute_signals(&img, &img, &region(0, 0, 40, 40)).unwrap();
        assert_eq!(signals.edge_density, 0.0);
    }

    #[test]
    fn test_high_contrast_change_is_occupied() {
        let reference = flat(64, 64, 128);
        let mut candidate = flat(64, 64, 128);
        let patch = checker(32, 32, 4);
        image::imageops::replace(&mut candidate, &patch, 16, 16);

        let r = region(16, 16, 32, 32);
        let signals = compute_signals(&reference, &candidate, &r).unwrap();

        assert!(
            signals.edge_density > 15.0,
            "edge density {} too low for dense checker",
            signals.edge_density
        );
        assert!(
            signals.ssim < 0.45,
            "ssim {} too high for structural change",
            signals.ssim
        );
        assert!(classify(&reference, &candidate, &r, &ClassifierConfig::default()).unwrap());
    }

    #[test]
    fn test_decision_rule_requires_both_signals() {
        let config = ClassifierConfig::default();

        let both = RegionSignals {
            edge_density: 20.0,
            ssim: 0.2,
        };
        let edges_only = RegionSignals {
            edge_density: 20.0,
            ssim: 0.9,
        };
        let ssim_only = RegionSignals {
            edge_density: 3.0,
            ssim: 0.2,
        };

        assert!(is_occupied(&both, &config));
        assert!(!is_occupied(&edges_only, &config));
        assert!(!is_occupied(&ssim_only, &config));
    }

    #[test]
    fn test_decision_rule_is_monotonic() {
        let config = ClassifierConfig::default();

        // Raising edge density while similarity stays below threshold never
        // flips occupied -> empty
        let mut last = false;
        for density in [16.0, 30.0, 80.0, 200.0] {
            let occupied = is_occupied(
                &RegionSignals {
                    edge_density: density,
                    ssim: 0.3,
                },
                &config,
            );
            assert!(occupied >= last);
            last = occupied;
        }

        // Lowering similarity while edge density stays above threshold never
        // flips occupied -> empty
        let mut last = false;
        for ssim in [0.44, 0.3, 0.1, -0.5] {
            let occupied = is_occupied(
                &RegionSignals {
                    edge_density: 20.0,
                    ssim,
                },
                &config,
            );
            assert!(occupied >= last);
            last = occupied;
        }
    }

    #[test]
    fn test_ssim_low_for_uncorrelated_content() {
        let a = checker(40, 40, 2);
        let b = flat(40, 40, 128);
        let score = ssim(&a, &b);
        assert!(score < 0.45, "ssim {} unexpectedly high", score);
        assert!(score >= -1.0 && score <= 1.0);
    }

    #[test]
    fn test_out_of_bounds_region_is_detected() {
        let img = flat(32, 32, 0);
        let err = compute_signals(&img, &img, &region(20, 20, 20, 20)).unwrap_err();
        assert!(matches!(err, Error::Detection(_)));
    }
}
