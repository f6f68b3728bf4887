//! 3D transformation utilities

use crate::point::{Point3d, Vector3d};
use nalgebra::{Isometry3, Matrix3, Matrix4, Rotation3, Transform3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// An affine 3D transformation (rotation, anisotropic scale, translation)
///
/// Points are column vectors: `p' = M * p`. Composition `a * b` applies `b` first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub matrix: Matrix4<f64>,
}

impl Transform3D {
    /// Create an identity transformation
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Create a translation transformation
    pub fn translation(translation: Vector3d) -> Self {
        Self {
            matrix: Matrix4::new_translation(&translation),
        }
    }

    /// Create a rotation transformation from a quaternion
    pub fn rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self {
            matrix: rotation.to_homogeneous(),
        }
    }

    /// Create a scaling transformation
    pub fn scaling(scale: Vector3d) -> Self {
        Self {
            matrix: Matrix4::new_nonuniform_scaling(&scale),
        }
    }

    /// Create a uniform scaling transformation
    pub fn uniform_scaling(scale: f64) -> Self {
        Self {
            matrix: Matrix4::new_scaling(scale),
        }
    }

    /// Create a transformation from translation and rotation
    pub fn from_translation_rotation(translation: Vector3d, rotation: UnitQuaternion<f64>) -> Self {
        let isometry = Isometry3::from_parts(translation.into(), rotation);
        Self {
            matrix: isometry.to_homogeneous(),
        }
    }

    /// Create a transformation from a 3x3 linear part and a translation
    pub fn from_linear_translation(linear: Matrix3<f64>, translation: Vector3d) -> Self {
        let mut matrix = linear.to_homogeneous();
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        Self { matrix }
    }

    /// The 3x3 linear (rotation and scale) part
    pub fn linear(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// The translation part
    pub fn translation_part(&self) -> Vector3d {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Per-axis scale factors (lengths of the linear part's columns)
    pub fn scale_factors(&self) -> Vector3d {
        let linear = self.linear();
        Vector3d::new(
            linear.column(0).norm(),
            linear.column(1).norm(),
            linear.column(2).norm(),
        )
    }

    /// The rotation closest to the linear part (polar decomposition)
    ///
    /// Reflections are folded into the rotation by flipping the weakest singular
    /// direction, so the result is always a proper rotation.
    pub fn rotation_part(&self) -> UnitQuaternion<f64> {
        let svd = self.linear().svd(true, true);
        let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
            return UnitQuaternion::identity();
        };
        let mut r = u * v_t;
        if r.determinant() < 0.0 {
            let mut u_fixed = u;
            let weakest = svd
                .singular_values
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(2);
            u_fixed.set_column(weakest, &(-u.column(weakest)));
            r = u_fixed * v_t;
        }
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r))
    }

    /// Apply the transformation to a point
    pub fn transform_point(&self, point: &Point3d) -> Point3d {
        let homogeneous = self.matrix * point.to_homogeneous();
        Point3d::from_homogeneous(homogeneous).unwrap_or(*point)
    }

    /// Apply the transformation to a set of points
    pub fn transform_points(&self, points: &[Point3d]) -> Vec<Point3d> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    /// Apply the transformation to a vector
    pub fn transform_vector(&self, vector: &Vector3d) -> Vector3d {
        self.matrix.fixed_view::<3, 3>(0, 0) * vector
    }

    /// Compose this transformation with another (`other` is applied first)
    pub fn compose(self, other: Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Get the inverse transformation
    pub fn inverse(self) -> Option<Self> {
        self.matrix
            .try_inverse()
            .map(|inv_matrix| Self { matrix: inv_matrix })
    }

    /// Check if this is approximately the identity transformation
    pub fn is_identity(&self, epsilon: f64) -> bool {
        let identity = Matrix4::identity();
        (self.matrix - identity).norm() < epsilon
    }

    /// Element-wise comparison within `epsilon`
    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.matrix
            .iter()
            .zip(other.matrix.iter())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform3D {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(rhs)
    }
}

impl From<Matrix4<f64>> for Transform3D {
    fn from(matrix: Matrix4<f64>) -> Self {
        Self { matrix }
    }
}

impl From<Isometry3<f64>> for Transform3D {
    fn from(isometry: Isometry3<f64>) -> Self {
        Self {
            matrix: isometry.to_homogeneous(),
        }
    }
}

impl From<Transform3<f64>> for Transform3D {
    fn from(transform: Transform3<f64>) -> Self {
        Self {
            matrix: transform.into_inner(),
        }
    }
}
