//! Rigid registration: Kabsch alignment and ICP refinement

use crate::nearest_neighbor::KdTree;
use autoinstance_core::{centroid, Error, NearestNeighborSearch, Point3d, Result};
use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion};

/// Result of ICP registration
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Final transformation
    pub transformation: Isometry3<f64>,
    /// Final mean squared error
    pub mse: f64,
    /// Largest nearest-neighbor distance after the final transformation
    pub max_distance: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Whether convergence was achieved
    pub converged: bool,
}

/// Compute the rigid transformation that best maps `source_points` onto the
/// corresponding `target_points` (Kabsch, via SVD)
pub fn compute_transformation(
    source_points: &[Point3d],
    target_points: &[Point3d],
) -> Result<Isometry3<f64>> {
    if source_points.len() != target_points.len() || source_points.is_empty() {
        return Err(Error::InvalidData("Point correspondence mismatch".to_string()));
    }

    let source_centroid = centroid(source_points)
        .ok_or_else(|| Error::InvalidData("Empty source".to_string()))?;
    let target_centroid = centroid(target_points)
        .ok_or_else(|| Error::InvalidData("Empty target".to_string()))?;

    // Cross-covariance H
    let mut h = Matrix3::zeros();
    for (src, tgt) in source_points.iter().zip(target_points.iter()) {
        let p = src - source_centroid;
        let q = tgt - target_centroid;
        h += p * q.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or_else(|| Error::Algorithm("SVD U matrix not available".to_string()))?;
    let v_t = svd.v_t.ok_or_else(|| Error::Algorithm("SVD V^T matrix not available".to_string()))?;

    let mut r = v_t.transpose() * u.transpose();

    // Ensure proper rotation (det(R) = 1)
    if r.determinant() < 0.0 {
        let mut v_t_corrected = v_t;
        v_t_corrected.set_row(2, &(-v_t.row(2)));
        r = v_t_corrected.transpose() * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = target_centroid - rotation * source_centroid;

    Ok(Isometry3::from_parts(
        Translation3::new(translation.x, translation.y, translation.z),
        rotation,
    ))
}

fn compute_mse(source_points: &[Point3d], target_points: &[Point3d]) -> f64 {
    if source_points.is_empty() {
        return 0.0;
    }
    let sum_squared_error: f64 = source_points
        .iter()
        .zip(target_points.iter())
        .map(|(src, tgt)| (src - tgt).norm_squared())
        .sum();
    sum_squared_error / source_points.len() as f64
}

/// Point-to-point ICP against a prebuilt index over `target`
///
/// Correspondences are nearest neighbors; pairs further apart than
/// `max_correspondence_distance` are ignored.
pub fn icp_with_index(
    source: &[Point3d],
    target: &[Point3d],
    target_index: &KdTree,
    init: Isometry3<f64>,
    max_iters: usize,
    max_correspondence_distance: Option<f64>,
    convergence_threshold: f64,
) -> Result<IcpResult> {
    if source.is_empty() || target.is_empty() {
        return Err(Error::InvalidData("Source or target point cloud is empty".to_string()));
    }
    if max_iters == 0 {
        return Err(Error::InvalidData("Max iterations must be positive".to_string()));
    }

    let mut current_transform = init;
    let mut previous_mse = f64::INFINITY;
    let mut iterations = 0;
    let mut converged = false;

    for _ in 0..max_iters {
        iterations += 1;
        let transformed: Vec<Point3d> = source.iter().map(|p| current_transform * p).collect();

        let mut valid_source = Vec::with_capacity(source.len());
        let mut valid_target = Vec::with_capacity(source.len());
        for p in &transformed {
            if let Some((idx, distance)) = target_index.find_nearest(p) {
                if max_correspondence_distance.is_some_and(|max| distance > max) {
                    continue;
                }
                valid_source.push(*p);
                valid_target.push(target[idx]);
            }
        }

        if valid_source.len() < 3 {
            return Err(Error::Algorithm("Insufficient correspondences found".to_string()));
        }

        let delta = compute_transformation(&valid_source, &valid_target)?;
        current_transform = delta * current_transform;

        let current_mse = compute_mse(&valid_source, &valid_target);
        if (previous_mse - current_mse).abs() < convergence_threshold {
            converged = true;
            break;
        }
        previous_mse = current_mse;
    }

    let transformed: Vec<Point3d> = source.iter().map(|p| current_transform * p).collect();
    let mut max_distance = 0.0f64;
    let mut sum_squared = 0.0;
    for p in &transformed {
        let d = target_index.find_nearest(p).map_or(f64::INFINITY, |(_, d)| d);
        max_distance = max_distance.max(d);
        sum_squared += d * d;
    }

    Ok(IcpResult {
        transformation: current_transform,
        mse: sum_squared / transformed.len() as f64,
        max_distance,
        iterations,
        converged,
    })
}

/// Point-to-point ICP registration of `source` onto `target`
pub fn icp(
    source: &[Point3d],
    target: &[Point3d],
    init: Isometry3<f64>,
    max_iters: usize,
    max_correspondence_distance: Option<f64>,
) -> Result<IcpResult> {
    let index = KdTree::new(target);
    icp_with_index(
        source,
        target,
        &index,
        init,
        max_iters,
        max_correspondence_distance,
        1e-12,
    )
}
