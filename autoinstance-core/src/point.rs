//! Point types and related functionality

use nalgebra::{Point3, Vector3};

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// A texture coordinate
pub type Uv = [f64; 2];

/// Arithmetic mean of a set of points, `None` for an empty slice
pub fn centroid(points: &[Point3d]) -> Option<Point3d> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector3d::zeros(), |acc, p| acc + p.coords);
    Some(Point3d::from(sum / points.len() as f64))
}

/// Round a value to `precision` decimal digits and return it as a fixed-point integer.
///
/// Quantized values are used as hashable, order-stable signature components.
pub fn quantize(value: f64, precision: u32) -> i64 {
    let factor = 10f64.powi(precision as i32);
    let scaled = (value * factor).round();
    // -0.0 and 0.0 must collapse to the same key
    if scaled == 0.0 {
        0
    } else {
        scaled as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_centroid() {
        let points = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
            Point3d::new(0.0, 4.0, 0.0),
            Point3d::new(2.0, 4.0, 8.0),
        ];
        let c = centroid(&points).unwrap();
        assert_relative_eq!(c.x, 1.0);
        assert_relative_eq!(c.y, 2.0);
        assert_relative_eq!(c.z, 2.0);
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn test_quantize_absorbs_noise() {
        assert_eq!(quantize(0.33333, 3), 333);
        assert_eq!(quantize(0.3334999, 3), quantize(0.3330001, 3));
        assert_eq!(quantize(-0.00001, 3), 0);
        assert_eq!(quantize(1.0, 4), 10000);
    }
}
