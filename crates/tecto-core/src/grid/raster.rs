//! Latitude/longitude raster over the grid for O(1) approximate lookups.
//!
//! Each bin caches the field nearest to its centre. A query returns the cached
//! field of the bin containing the point, so answers can be off by one field
//! within roughly half a bin of a field edge. Finer bins trade memory for
//! accuracy.

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::grid::kd_tree::KdTree;
use crate::sphere::{from_latlon, to_latlon, Vec3};

pub struct RasterIndex {
    lat_bins: usize,
    lon_bins: usize,
    cells: Vec<u32>,
}

impl RasterIndex {
    /// Build a raster with `lat_bins` rows and `2 * lat_bins` columns.
    pub fn build(tree: &KdTree, lat_bins: usize) -> Self {
        let lat_bins = lat_bins.max(1);
        let lon_bins = lat_bins * 2;
        let n = lat_bins * lon_bins;

        let lookup = |idx: usize| -> u32 {
            let (lat, lon) = bin_center(idx / lon_bins, idx % lon_bins, lat_bins, lon_bins);
            tree.nearest(&from_latlon(lat, lon)).map(|(id, _)| id).unwrap_or(0)
        };

        #[cfg(feature = "threading")]
        let cells: Vec<u32> = (0..n).into_par_iter().map(lookup).collect();
        #[cfg(not(feature = "threading"))]
        let cells: Vec<u32> = (0..n).map(lookup).collect();

        Self { lat_bins, lon_bins, cells }
    }

    pub fn lat_bins(&self) -> usize {
        self.lat_bins
    }

    /// Bytes used by the cached bin table.
    pub fn memory_bytes(&self) -> usize {
        self.cells.len() * std::mem::size_of::<u32>()
    }

    /// Cached field id of the bin containing `p`.
    pub fn lookup(&self, p: &Vec3) -> u32 {
        let (lat, lon) = to_latlon(p);
        let row = (((lat + 90.0) / 180.0) * self.lat_bins as f64).floor() as isize;
        let col = (((lon + 180.0) / 360.0) * self.lon_bins as f64).floor() as isize;
        let row = row.clamp(0, self.lat_bins as isize - 1) as usize;
        let col = col.rem_euclid(self.lon_bins as isize) as usize;
        self.cells[row * self.lon_bins + col]
    }

    /// Centre of bin `(row, col)` as a unit vector.
    pub fn bin_center_point(&self, row: usize, col: usize) -> Vec3 {
        let (lat, lon) = bin_center(row, col, self.lat_bins, self.lon_bins);
        from_latlon(lat, lon)
    }
}

fn bin_center(row: usize, col: usize, lat_bins: usize, lon_bins: usize) -> (f64, f64) {
    let lat = (row as f64 + 0.5) / lat_bins as f64 * 180.0 - 90.0;
    let lon = (col as f64 + 0.5) / lon_bins as f64 * 360.0 - 180.0;
    (lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::random_sphere_point;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_tree() -> (Vec<(u32, Vec3)>, KdTree) {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let points: Vec<(u32, Vec3)> = (0..200).map(|i| (i, random_sphere_point(&mut rng))).collect();
        let tree = KdTree::build(&points);
        (points, tree)
    }

    #[test]
    fn bin_centers_match_exact_lookup() {
        let (_, tree) = sample_tree();
        let raster = RasterIndex::build(&tree, 32);
        for row in 0..32 {
            for col in (0..64).step_by(7) {
                let p = raster.bin_center_point(row, col);
                assert_eq!(raster.lookup(&p), tree.nearest(&p).unwrap().0);
            }
        }
    }

    #[test]
    fn memory_grows_with_resolution() {
        let (_, tree) = sample_tree();
        let coarse = RasterIndex::build(&tree, 16);
        let fine = RasterIndex::build(&tree, 64);
        assert_eq!(coarse.memory_bytes() * 16, fine.memory_bytes());
    }

    #[test]
    fn poles_and_dateline_are_addressable() {
        let (_, tree) = sample_tree();
        let raster = RasterIndex::build(&tree, 16);
        let _ = raster.lookup(&Vec3::new(0.0, 0.0, 1.0));
        let _ = raster.lookup(&Vec3::new(0.0, 0.0, -1.0));
        let _ = raster.lookup(&from_latlon(0.0, 180.0));
        let _ = raster.lookup(&from_latlon(0.0, -180.0));
    }
}
