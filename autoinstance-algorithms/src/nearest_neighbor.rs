//! Nearest neighbor search implementations

use autoinstance_core::{NearestNeighborSearch, Point3d};
use rstar::primitives::GeomWithData;
use rstar::RTree;

type IndexedPoint = GeomWithData<[f64; 3], usize>;

/// Spatial index for nearest neighbor search, backed by an R*-tree
pub struct KdTree {
    tree: RTree<IndexedPoint>,
}

impl KdTree {
    pub fn new(points: &[Point3d]) -> Self {
        let items = points
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedPoint::new([p.x, p.y, p.z], idx))
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl NearestNeighborSearch for KdTree {
    fn find_nearest(&self, query: &Point3d) -> Option<(usize, f64)> {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&[query.x, query.y, query.z])
            .next()
            .map(|(item, d2)| (item.data, d2.sqrt()))
    }

    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)> {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&[query.x, query.y, query.z])
            .take(k)
            .map(|(item, d2)| (item.data, d2.sqrt()))
            .collect()
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)> {
        let q = [query.x, query.y, query.z];
        let mut found: Vec<(usize, f64)> = self
            .tree
            .locate_within_distance(q, radius * radius)
            .map(|item| {
                let g = item.geom();
                let d2 = (g[0] - q[0]).powi(2) + (g[1] - q[1]).powi(2) + (g[2] - q[2]).powi(2);
                (item.data, d2.sqrt())
            })
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1));
        found
    }
}

/// Simple brute force nearest neighbor search for small datasets
pub struct BruteForceSearch {
    points: Vec<Point3d>,
}

impl BruteForceSearch {
    pub fn new(points: &[Point3d]) -> Self {
        Self {
            points: points.to_vec(),
        }
    }
}

impl NearestNeighborSearch for BruteForceSearch {
    fn find_nearest(&self, query: &Point3d) -> Option<(usize, f64)> {
        self.find_k_nearest(query, 1).into_iter().next()
    }

    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)> {
        let mut distances: Vec<(usize, f64)> = self
            .points
            .iter()
            .enumerate()
            .map(|(idx, point)| (idx, (point - query).norm()))
            .collect();

        // Stable sort keeps insertion order among equidistant points
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.truncate(k);
        distances
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)> {
        let mut found: Vec<(usize, f64)> = self
            .points
            .iter()
            .enumerate()
            .filter_map(|(idx, point)| {
                let distance = (point - query).norm();
                (distance <= radius).then_some((idx, distance))
            })
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1));
        found
    }
}

/// Largest distance from any query point to its nearest neighbor in `index`
///
/// Returns `f64::INFINITY` when either side is empty. Stops early once
/// `early_exit` is exceeded, since callers only need to know whether a bound holds.
pub fn max_nearest_distance<S: NearestNeighborSearch>(
    index: &S,
    queries: &[Point3d],
    early_exit: f64,
) -> f64 {
    if queries.is_empty() {
        return f64::INFINITY;
    }
    let mut worst = 0.0f64;
    for q in queries {
        match index.find_nearest(q) {
            Some((_, d)) => {
                worst = worst.max(d);
                if worst > early_exit {
                    return worst;
                }
            }
            None => return f64::INFINITY,
        }
    }
    worst
}

/// Symmetric nearest-neighbor (Hausdorff-style) comparison of two point clouds
///
/// Point order is irrelevant; every point of either cloud must have a partner in
/// the other cloud within `tolerance`.
pub fn clouds_match(a: &[Point3d], b: &[Point3d], tolerance: f64) -> bool {
    clouds_match_with_index(a, b, &KdTree::new(b), tolerance)
}

/// [`clouds_match`] reusing a prebuilt index over `b`
pub fn clouds_match_with_index(a: &[Point3d], b: &[Point3d], index_b: &KdTree, tolerance: f64) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if max_nearest_distance(index_b, a, tolerance) > tolerance {
        return false;
    }
    let index_a = KdTree::new(a);
    max_nearest_distance(&index_a, b, tolerance) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Point3d> {
        let mut points = Vec::new();
        for x in 0..5 {
            for y in 0..5 {
                for z in 0..3 {
                    points.push(Point3d::new(x as f64, y as f64 * 0.5, z as f64 * 2.0));
                }
            }
        }
        points
    }

    #[test]
    fn test_kdtree_matches_brute_force() {
        let points = grid();
        let kdtree = KdTree::new(&points);
        let brute = BruteForceSearch::new(&points);
        let query = Point3d::new(2.2, 0.9, 1.1);

        let a = kdtree.find_k_nearest(&query, 6);
        let b = brute.find_k_nearest(&query, 6);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x.1 - y.1).abs() < 1e-12);
        }

        let (idx, dist) = kdtree.find_nearest(&query).unwrap();
        assert!((dist - b[0].1).abs() < 1e-12);
        assert!((points[idx] - query).norm() - dist < 1e-12);
    }

    #[test]
    fn test_radius_neighbors() {
        let points = grid();
        let kdtree = KdTree::new(&points);
        let brute = BruteForceSearch::new(&points);
        let query = Point3d::new(1.0, 1.0, 2.0);

        let a = kdtree.find_radius_neighbors(&query, 1.1);
        let b = brute.find_radius_neighbors(&query, 1.1);
        assert_eq!(a.len(), b.len());
        assert!(a.iter().all(|(_, d)| *d <= 1.1));
    }

    #[test]
    fn test_empty_index() {
        let kdtree = KdTree::new(&[]);
        assert!(kdtree.is_empty());
        assert!(kdtree.find_nearest(&Point3d::origin()).is_none());
        assert_eq!(max_nearest_distance(&kdtree, &[Point3d::origin()], 1.0), f64::INFINITY);
    }

    #[test]
    fn test_clouds_match_ignores_order() {
        let a = grid();
        let mut b = a.clone();
        b.reverse();
        assert!(clouds_match(&a, &b, 1e-9));

        b[0].x += 0.1;
        assert!(!clouds_match(&a, &b, 0.01));
        assert!(clouds_match(&a, &b, 0.2));
    }

    #[test]
    fn test_clouds_match_is_symmetric() {
        // Every point of `a` lies on `b`, but `b` has an extra far point
        let a = vec![Point3d::new(0.0, 0.0, 0.0), Point3d::new(1.0, 0.0, 0.0)];
        let b = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(5.0, 0.0, 0.0),
        ];
        assert!(!clouds_match(&a, &b, 0.01));
        assert!(!clouds_match(&b, &a, 0.01));
    }
}
