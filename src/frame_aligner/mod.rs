//! FrameAligner - Geometric Alignment of Live Frames
//!
//! ## Responsibilities
//!
//! - Detect local features in the reference and candidate frames
//! - Match binary descriptors with cross-checked Hamming distance
//! - Estimate a robust homography (RANSAC + normalized DLT)
//! - Warp the candidate into the reference coordinate frame
//!
//! The reference image is the fixed coordinate system: `align` always returns
//! the candidate warped onto the reference, sized like the reference. Region
//! coordinates are only meaningful in that frame.

use crate::error::{Error, Result};
use image::{GrayImage, Luma};
use imageproc::binary_descriptors::brief::{brief, BriefDescriptor};
use imageproc::binary_descriptors::BinaryDescriptor;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::point::Point;
use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::seq::index::sample;
use rand::thread_rng;

/// Upper bound on detected features per frame
const MAX_FEATURES: usize = 5000;
/// FAST-9 corner intensity threshold
const FAST_THRESHOLD: u8 = 20;
/// Descriptor length in bits
const DESCRIPTOR_BITS: usize = 256;
/// Keypoints closer than this to an image border are discarded, keeping the
/// descriptor sampling patch fully inside the frame
const BORDER_MARGIN: u32 = 20;
/// Smoothing applied before feature extraction
const BLUR_SIGMA: f32 = 1.5;
/// Minimum cross-checked matches for a stable fit
const MIN_MATCHES: usize = 10;
/// RANSAC sampling rounds
const RANSAC_ITERATIONS: usize = 1000;
/// Inlier reprojection tolerance in pixels
const RANSAC_TOLERANCE: f64 = 5.0;

/// A cross-checked descriptor match between candidate and reference
#[derive(Debug, Clone, Copy)]
struct FeatureMatch {
    /// Index into the candidate keypoint list
    candidate: usize,
    /// Index into the reference keypoint list
    reference: usize,
    /// Hamming distance between the two descriptors
    distance: u32,
}

/// Warp `candidate` into the coordinate frame of `reference`.
///
/// Returns an image with the reference's dimensions; pixels with no source
/// location are filled with black. Fails with [`Error::Alignment`] when too
/// few reliable correspondences exist for a stable homography.
pub fn align(reference: &GrayImage, candidate: &GrayImage) -> Result<GrayImage> {
    let ref_blurred = gaussian_blur_f32(reference, BLUR_SIGMA);
    let cand_blurred = gaussian_blur_f32(candidate, BLUR_SIGMA);

    let ref_keypoints = detect_keypoints(&ref_blurred);
    let cand_keypoints = detect_keypoints(&cand_blurred);

    if ref_keypoints.len() < MIN_MATCHES || cand_keypoints.len() < MIN_MATCHES {
        return Err(Error::Alignment(format!(
            "too few features: reference={}, candidate={}",
            ref_keypoints.len(),
            cand_keypoints.len()
        )));
    }

    // Both frames must be described with the same test pairs for their
    // descriptors to be comparable.
    let (ref_descriptors, test_pairs) = brief(&ref_blurred, &ref_keypoints, DESCRIPTOR_BITS, None)
        .map_err(|e| Error::Alignment(format!("reference descriptors: {}", e)))?;
    let (cand_descriptors, _) = brief(
        &cand_blurred,
        &cand_keypoints,
        DESCRIPTOR_BITS,
        Some(&test_pairs),
    )
    .map_err(|e| Error::Alignment(format!("candidate descriptors: {}", e)))?;

    let matches = cross_check_matches(&cand_descriptors, &ref_descriptors);
    if matches.len() < MIN_MATCHES {
        return Err(Error::Alignment(format!(
            "only {} cross-checked matches, need at least {}",
            matches.len(),
            MIN_MATCHES
        )));
    }

    let src: Vec<(f64, f64)> = matches
        .iter()
        .map(|m| {
            let p = cand_keypoints[m.candidate];
            (p.x as f64, p.y as f64)
        })
        .collect();
    let dst: Vec<(f64, f64)> = matches
        .iter()
        .map(|m| {
            let p = ref_keypoints[m.reference];
            (p.x as f64, p.y as f64)
        })
        .collect();

    let homography = ransac_homography(&src, &dst, RANSAC_ITERATIONS, RANSAC_TOLERANCE)
        .ok_or_else(|| {
            Error::Alignment("no consensus homography within inlier tolerance".to_string())
        })?;

    warp_candidate(candidate, &homography, reference.width(), reference.height())
}

/// FAST-9 corners, strongest first, capped and kept clear of the borders
fn detect_keypoints(image: &GrayImage) -> Vec<Point<u32>> {
    let (width, height) = image.dimensions();
    if width <= 2 * BORDER_MARGIN || height <= 2 * BORDER_MARGIN {
        return Vec::new();
    }

    let mut corners = corners_fast9(image, FAST_THRESHOLD);
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));
    corners.truncate(MAX_FEATURES);

    corners
        .into_iter()
        .filter(|c| {
            c.x >= BORDER_MARGIN
                && c.y >= BORDER_MARGIN
                && c.x < width - BORDER_MARGIN
                && c.y < height - BORDER_MARGIN
        })
        .map(|c| Point::new(c.x, c.y))
        .collect()
}

/// Brute-force Hamming matching, keeping only mutual best pairs.
///
/// Returned matches are ordered by ascending distance; the ordering does not
/// affect the homography fit but keeps the best correspondences first for
/// inspection.
fn cross_check_matches(
    candidate: &[BriefDescriptor],
    reference: &[BriefDescriptor],
) -> Vec<FeatureMatch> {
    let forward: Vec<Option<(usize, u32)>> = candidate
        .iter()
        .map(|d| nearest_descriptor(d, reference))
        .collect();
    let backward: Vec<Option<(usize, u32)>> = reference
        .iter()
        .map(|d| nearest_descriptor(d, candidate))
        .collect();

    let mut matches: Vec<FeatureMatch> = forward
        .iter()
        .enumerate()
        .filter_map(|(ci, best)| {
            let (ri, distance) = (*best)?;
            // Accept only if the reference side picked this candidate back
            match backward[ri] {
                Some((back, _)) if back == ci => Some(FeatureMatch {
                    candidate: ci,
                    reference: ri,
                    distance,
                }),
                _ => None,
            }
        })
        .collect();

    matches.sort_by_key(|m| m.distance);
    matches
}

fn nearest_descriptor(query: &BriefDescriptor, pool: &[BriefDescriptor]) -> Option<(usize, u32)> {
    pool.iter()
        .enumerate()
        .map(|(i, d)| (i, query.hamming_distance(d)))
        .min_by_key(|&(_, dist)| dist)
}

/// Consensus-sampled homography mapping `src` points onto `dst` points.
///
/// Runs fixed-round RANSAC over 4-point minimal samples, then refits on the
/// best inlier set. Returns `None` when no sample reaches 4 inliers.
fn ransac_homography(
    src: &[(f64, f64)],
    dst: &[(f64, f64)],
    iterations: usize,
    tolerance: f64,
) -> Option<Matrix3<f64>> {
    debug_assert_eq!(src.len(), dst.len());
    let n = src.len();
    if n < 4 {
        return None;
    }

    let mut rng = thread_rng();
    let mut best_inliers: Vec<usize> = Vec::new();

    for _ in 0..iterations {
        let picks = sample(&mut rng, n, 4).into_vec();
        let sample_src: Vec<(f64, f64)> = picks.iter().map(|&i| src[i]).collect();
        let sample_dst: Vec<(f64, f64)> = picks.iter().map(|&i| dst[i]).collect();

        let Some(h) = fit_homography(&sample_src, &sample_dst) else {
            continue;
        };

        let inliers: Vec<usize> = (0..n)
            .filter(|&i| reprojection_error(&h, src[i], dst[i]) < tolerance)
            .collect();

        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
            // All points already agree, no better sample exists
            if best_inliers.len() == n {
                break;
            }
        }
    }

    if best_inliers.len() < 4 {
        return None;
    }

    let inlier_src: Vec<(f64, f64)> = best_inliers.iter().map(|&i| src[i]).collect();
    let inlier_dst: Vec<(f64, f64)> = best_inliers.iter().map(|&i| dst[i]).collect();
    fit_homography(&inlier_src, &inlier_dst)
}

fn reprojection_error(h: &Matrix3<f64>, src: (f64, f64), dst: (f64, f64)) -> f64 {
    let v = h * Vector3::new(src.0, src.1, 1.0);
    if !v[2].is_finite() || v[2].abs() < 1e-12 {
        return f64::INFINITY;
    }
    let x = v[0] / v[2];
    let y = v[1] / v[2];
    ((x - dst.0).powi(2) + (y - dst.1).powi(2)).sqrt()
}

/// Direct linear transform with Hartley normalization.
///
/// Stacks two constraint rows per point pair and takes the null-space
/// direction of the normal equations as the homography, so minimal 4-point
/// samples and larger inlier sets go through the same path.
fn fit_homography(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 {
        return None;
    }

    let (src_norm, t_src) = normalize_points(src)?;
    let (dst_norm, t_dst) = normalize_points(dst)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let (x, y) = src_norm[i];
        let (u, v) = dst_norm[i];
        a.row_mut(2 * i)
            .copy_from_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        a.row_mut(2 * i + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
    }

    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)?;
    let h_vec = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(
        h_vec[0], h_vec[1], h_vec[2], h_vec[3], h_vec[4], h_vec[5], h_vec[6], h_vec[7], h_vec[8],
    );

    let t_dst_inv = t_dst.try_inverse()?;
    let mut h = t_dst_inv * h_norm * t_src;

    if h[(2, 2)].abs() < 1e-12 {
        return None;
    }
    h /= h[(2, 2)];
    Some(h)
}

/// Translate the centroid to the origin and scale the mean distance to sqrt(2)
fn normalize_points(points: &[(f64, f64)]) -> Option<(Vec<(f64, f64)>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let scale = std::f64::consts::SQRT_2 / mean_dist;

    let normalized = points
        .iter()
        .map(|p| ((p.0 - cx) * scale, (p.1 - cy) * scale))
        .collect();
    let transform = Matrix3::new(scale, 0.0, -scale * cx, 0.0, scale, -scale * cy, 0.0, 0.0, 1.0);
    Some((normalized, transform))
}

/// Warp the full candidate through the homography into the reference's size
fn warp_candidate(
    candidate: &GrayImage,
    homography: &Matrix3<f64>,
    out_width: u32,
    out_height: u32,
) -> Result<GrayImage> {
    let m: Vec<f32> = homography.transpose().iter().map(|&v| v as f32).collect();
    let matrix: [f32; 9] = m
        .try_into()
        .map_err(|_| Error::Internal("homography is not 3x3".to_string()))?;

    let projection = Projection::from_matrix(matrix)
        .ok_or_else(|| Error::Alignment("homography is not invertible".to_string()))?;

    let mut aligned = GrayImage::new(out_width, out_height);
    warp_into(
        candidate,
        &projection,
        Interpolation::Bilinear,
        Luma([0u8]),
        &mut aligned,
    );
    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic blocky test frame with plenty of corners
    fn textured_frame(width: u32, height: u32) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        let mut state: u32 = 0x2458_1f2d;
        for y in (0..height).step_by(10) {
            for x in (0..width).step_by(10) {
                // xorshift32
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

    #[test]
    fn test_identity_alignment_preserves_image() {
        let frame = textured_frame(200, 150);
        let aligned = align(&frame, &frame).unwrap();

        assert_eq!(aligned.dimensions(), frame.dimensions());

        let total_abs_diff: u64 = frame
            .pixels()
            .zip(aligned.pixels())
            .map(|(a, b)| (a[0] as i64 - b[0] as i64).unsigned_abs())
            .sum();
        let mean_abs_diff = total_abs_diff as f64 / (200.0 * 150.0);
        assert!(
            mean_abs_diff < 1.0,
            "identity alignment drifted, mean abs diff = {:.3}",
            mean_abs_diff
        );
    }

    #[test]
    fn test_featureless_frame_fails_alignment() {
        let flat = GrayImage::from_pixel(200, 150, Luma([128u8]));
        let err = align(&flat, &flat).unwrap_err();
        assert!(matches!(err, Error::Alignment(_)));
    }

    #[test]
    fn test_fit_homography_recovers_translation() {
        let src = vec![(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0), (50.0, 25.0)];
        let dst: Vec<(f64, f64)> = src.iter().map(|p| (p.0 + 10.0, p.1 - 5.0)).collect();

        let h = fit_homography(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            assert!(reprojection_error(&h, *s, *d) < 1e-6);
        }
    }

    #[test]
    fn test_ransac_rejects_outliers() {
        let mut src: Vec<(f64, f64)> = Vec::new();
        let mut dst: Vec<(f64, f64)> = Vec::new();
        for i in 0..20 {
            let x = (i % 5) as f64 * 40.0;
            let y = (i / 5) as f64 * 40.0;
            src.push((x, y));
            dst.push((x + 7.0, y + 3.0));
        }
        // A quarter of the matches are wildly wrong
        for i in 0..5 {
            src.push((i as f64 * 13.0, 200.0));
            dst.push((500.0 - i as f64 * 90.0, i as f64 * 77.0));
        }

        let h = ransac_homography(&src, &dst, 1000, 2.0).unwrap();
        for i in 0..20 {
            assert!(
                reprojection_error(&h, src[i], dst[i]) < 1.0,
                "inlier {} not fit by consensus homography",
                i
            );
        }
    }

    #[test]
    fn test_too_few_points_fails() {
        let pts = vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];
        assert!(fit_homography(&pts, &pts).is_none());
        assert!(ransac_homography(&pts, &pts, 100, 5.0).is_none());
    }
}
