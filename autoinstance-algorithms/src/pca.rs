//! Principal component analysis and whitening of point clouds

use autoinstance_core::{centroid, Point3d, Vector3d};
use nalgebra::{Matrix3, Rotation3, SymmetricEigen, UnitQuaternion};

/// Variance below which an axis is treated as flat
pub const MIN_VARIANCE: f64 = 1e-9;

/// Sample covariance (N - 1 normalization) of `points` around `center`
pub fn covariance(points: &[Point3d], center: &Point3d) -> Matrix3<f64> {
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p - center;
        cov += d * d.transpose();
    }
    let denom = points.len().saturating_sub(1).max(1) as f64;
    cov / denom
}

/// Principal axes of a point cloud
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalAxes {
    pub centroid: Point3d,
    /// Eigenvalues of the covariance, largest first
    pub eigenvalues: Vector3d,
    /// Unit eigenvectors stored as columns in the order of `eigenvalues`.
    /// The basis is always right-handed.
    pub axes: Matrix3<f64>,
}

impl PrincipalAxes {
    /// Principal axes of `points`, `None` for fewer than three points or non-finite input
    pub fn compute(points: &[Point3d]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let centroid = centroid(points)?;
        let cov = covariance(points, &centroid);
        if !cov.iter().all(|v| v.is_finite()) {
            return None;
        }

        let eigen = SymmetricEigen::new(cov);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let eigenvalues = Vector3d::new(
            eigen.eigenvalues[order[0]].max(0.0),
            eigen.eigenvalues[order[1]].max(0.0),
            eigen.eigenvalues[order[2]].max(0.0),
        );
        let x = eigen.eigenvectors.column(order[0]).normalize();
        let y = eigen.eigenvectors.column(order[1]).normalize();
        let z = x.cross(&y);
        let axes = Matrix3::from_columns(&[x, y, z]);

        Some(Self {
            centroid,
            eigenvalues,
            axes,
        })
    }

    /// Eigenvalues sorted ascending and divided by the largest one
    ///
    /// Invariant under rotation, translation and uniform scale.
    pub fn normalized_eigenvalues(&self) -> [f64; 3] {
        let max = self.eigenvalues[0];
        let mut values = [self.eigenvalues[2], self.eigenvalues[1], self.eigenvalues[0]];
        if max > 1e-6 {
            for v in &mut values {
                *v /= max;
            }
        }
        values
    }

    /// Rotation taking the world axes onto the principal axes (x = major, y = middle)
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(self.axes))
    }

    /// Whether all points coincide
    pub fn is_degenerate(&self) -> bool {
        self.eigenvalues[0] < 1e-12
    }
}

/// A point cloud centred, rotated onto its own principal axes, and scaled to unit variance
#[derive(Debug, Clone)]
pub struct Whitened {
    pub points: Vec<Point3d>,
    pub axes: Matrix3<f64>,
    /// Per-axis factors `1 / sqrt(eigenvalue)`, or 1 for flat axes
    pub scales: Vector3d,
    pub centroid: Point3d,
}

impl Whitened {
    /// Linear map from the original (centred) space into whitened space
    pub fn forward(&self) -> Matrix3<f64> {
        Matrix3::from_diagonal(&self.scales) * self.axes.transpose()
    }

    /// Linear map from whitened space back into the original (centred) space
    pub fn backward(&self) -> Matrix3<f64> {
        let inv = self.scales.map(|s| 1.0 / s);
        self.axes * Matrix3::from_diagonal(&inv)
    }
}

/// Whiten a point cloud, `None` when no principal axes exist
pub fn whiten(points: &[Point3d]) -> Option<Whitened> {
    let pca = PrincipalAxes::compute(points)?;
    let scales = pca.eigenvalues.map(|e| {
        if e < MIN_VARIANCE {
            1.0
        } else {
            1.0 / e.sqrt()
        }
    });
    let forward = Matrix3::from_diagonal(&scales) * pca.axes.transpose();
    let whitened = points
        .iter()
        .map(|p| Point3d::from(forward * (p - pca.centroid)))
        .collect();

    Some(Whitened {
        points: whitened,
        axes: pca.axes,
        scales,
        centroid: pca.centroid,
    })
}
