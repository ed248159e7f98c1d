//! Static 3-D k-d tree over field positions.
//!
//! Built once with median splits; queries are exact. Ties are broken by the
//! smaller field id so that lookups are deterministic.

use crate::sphere::Vec3;

struct Node {
    point: Vec3,
    id: u32,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

pub struct KdTree {
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl KdTree {
    /// Build a tree over `(id, position)` pairs.
    pub fn build(points: &[(u32, Vec3)]) -> Self {
        let mut items: Vec<(u32, Vec3)> = points.to_vec();
        let mut nodes = Vec::with_capacity(items.len());
        let root = build_recursive(&mut items, 0, &mut nodes);
        Self { nodes, root }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Closest point id and its squared distance.
    pub fn nearest(&self, query: &Vec3) -> Option<(u32, f64)> {
        let mut best: Option<(u32, f64)> = None;
        if let Some(root) = self.root {
            self.nearest_recursive(root, query, &mut best);
        }
        best
    }

    /// The `k` closest point ids with squared distances, nearest first.
    pub fn k_nearest(&self, query: &Vec3, k: usize) -> Vec<(u32, f64)> {
        let mut best: Vec<(u32, f64)> = Vec::with_capacity(k + 1);
        if k == 0 {
            return best;
        }
        if let Some(root) = self.root {
            self.k_nearest_recursive(root, query, k, &mut best);
        }
        best
    }

    fn nearest_recursive(&self, idx: usize, query: &Vec3, best: &mut Option<(u32, f64)>) {
        let node = &self.nodes[idx];
        let d2 = (node.point - query).norm_squared();
        let better = match *best {
            None => true,
            Some((id, bd)) => d2 < bd || (d2 == bd && node.id < id),
        };
        if better {
            *best = Some((node.id, d2));
        }

        let diff = query[node.axis] - node.point[node.axis];
        let (near, far) = if diff <= 0.0 { (node.left, node.right) } else { (node.right, node.left) };
        if let Some(n) = near {
            self.nearest_recursive(n, query, best);
        }
        if let Some(f) = far {
            let bound = best.map(|(_, bd)| bd).unwrap_or(f64::INFINITY);
            if diff * diff <= bound {
                self.nearest_recursive(f, query, best);
            }
        }
    }

    fn k_nearest_recursive(&self, idx: usize, query: &Vec3, k: usize, best: &mut Vec<(u32, f64)>) {
        let node = &self.nodes[idx];
        let d2 = (node.point - query).norm_squared();
        if best.len() < k || d2 < best[best.len() - 1].1 {
            let pos = best
                .iter()
                .position(|&(id, bd)| d2 < bd || (d2 == bd && node.id < id))
                .unwrap_or(best.len());
            best.insert(pos, (node.id, d2));
            best.truncate(k);
        }

        let diff = query[node.axis] - node.point[node.axis];
        let (near, far) = if diff <= 0.0 { (node.left, node.right) } else { (node.right, node.left) };
        if let Some(n) = near {
            self.k_nearest_recursive(n, query, k, best);
        }
        if let Some(f) = far {
            let bound = if best.len() < k { f64::INFINITY } else { best[best.len() - 1].1 };
            if diff * diff <= bound {
                self.k_nearest_recursive(f, query, k, best);
            }
        }
    }
}

fn build_recursive(items: &mut [(u32, Vec3)], depth: usize, nodes: &mut Vec<Node>) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let axis = depth % 3;
    items.sort_by(|a, b| a.1[axis].total_cmp(&b.1[axis]).then(a.0.cmp(&b.0)));
    let mid = items.len() / 2;
    let (id, point) = items[mid];
    let idx = nodes.len();
    nodes.push(Node { point, id, axis, left: None, right: None });

    let (lower, upper) = items.split_at_mut(mid);
    let left = build_recursive(lower, depth + 1, nodes);
    let right = build_recursive(&mut upper[1..], depth + 1, nodes);
    nodes[idx].left = left;
    nodes[idx].right = right;
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::random_sphere_point;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn brute_force(points: &[(u32, Vec3)], q: &Vec3) -> u32 {
        points
            .iter()
            .min_by(|a, b| (a.1 - q).norm_squared().total_cmp(&(b.1 - q).norm_squared()))
            .map(|p| p.0)
            .unwrap()
    }

    #[test]
    fn nearest_matches_brute_force() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let points: Vec<(u32, Vec3)> = (0..500).map(|i| (i, random_sphere_point(&mut rng))).collect();
        let tree = KdTree::build(&points);
        assert_eq!(tree.len(), 500);
        for _ in 0..200 {
            let q = random_sphere_point(&mut rng);
            assert_eq!(tree.nearest(&q).unwrap().0, brute_force(&points, &q));
        }
    }

    #[test]
    fn k_nearest_is_sorted_and_complete() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let points: Vec<(u32, Vec3)> = (0..300).map(|i| (i, random_sphere_point(&mut rng))).collect();
        let tree = KdTree::build(&points);
        let q = random_sphere_point(&mut rng);
        let result = tree.k_nearest(&q, 7);
        assert_eq!(result.len(), 7);
        assert!(result.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(result[0].0, brute_force(&points, &q));

        let mut all: Vec<f64> = points.iter().map(|p| (p.1 - q).norm_squared()).collect();
        all.sort_by(f64::total_cmp);
        assert!((result[6].1 - all[6]).abs() < 1e-15);
    }

    #[test]
    fn empty_tree_has_no_nearest() {
        let tree = KdTree::build(&[]);
        assert!(tree.is_empty());
        assert!(tree.nearest(&Vec3::new(0.0, 0.0, 1.0)).is_none());
    }
}
