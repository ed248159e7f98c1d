//! Icosahedral geodesic grid and the spatial index built over it.
//!
//! The grid is built from 5 peels, each made of two rhombi (the "top" rhombus
//! touching the north pole and the "bottom" one touching the south pole). Every
//! rhombus owns a d×d block of lattice points, which together with the two
//! poles gives 10·d² + 2 fields. The 10 tropical icosahedron vertices are the
//! lattice corners `(d, 0)` of every rhombus; with the poles they are the only
//! fields with five neighbours.
//!
//! Lattice layout of peel `p` (U = upper tropical vertex, L = lower):
//!
//! ```text
//!   top rhombus:    (0,0)=N       (d,0)=U[p]  (0,d)=U[p+1]  (d,d)=L[p]
//!   bottom rhombus: (0,0)=U[p+1]  (d,0)=L[p]  (0,d)=L[p+1]  (d,d)=S
//! ```
//!
//! Each rhombus owns `i ∈ 1..=d, j ∈ 0..d`; the remaining edges belong to the
//! neighbouring rhombus and are resolved by [`GeodesicGrid`]'s id mapping.

pub mod kd_tree;
pub mod raster;

use std::collections::VecDeque;

use crate::config::{SimConfig, SpatialIndexMode};
use crate::error::{Result, TectoError};
use crate::sphere::{great_circle_distance_rad, slerp, Vec3};
use kd_tree::KdTree;
use raster::RasterIndex;

pub type FieldId = u32;

pub const NORTH_POLE: FieldId = 0;
pub const SOUTH_POLE: FieldId = 1;

/// Up to six neighbour ids stored inline, sorted ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjacency {
    ids: [FieldId; 6],
    len: u8,
}

impl Adjacency {
    fn empty() -> Self {
        Self { ids: [0; 6], len: 0 }
    }

    fn insert(&mut self, id: FieldId) {
        let n = self.len as usize;
        if self.ids[..n].contains(&id) {
            return;
        }
        debug_assert!(n < 6, "grid field has more than six neighbours (adding {id})");
        if n == 6 {
            return;
        }
        self.ids[n] = id;
        self.len += 1;
        self.ids[..n + 1].sort_unstable();
    }

    pub fn as_slice(&self) -> &[FieldId] {
        &self.ids[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One immutable grid cell.
#[derive(Debug, Clone)]
pub struct GridField {
    pub id: FieldId,
    pub position: Vec3,
    pub adjacent: Adjacency,
}

// ── Spatial index ─────────────────────────────────────────────────────────────

/// Nearest-field lookup: an exact k-d tree plus an optional cached raster.
pub struct SpatialIndex {
    tree: KdTree,
    raster: Option<RasterIndex>,
    mode: SpatialIndexMode,
}

impl SpatialIndex {
    /// `bin_size` is the raster bin edge in radians.
    pub fn build(points: &[(FieldId, Vec3)], mode: SpatialIndexMode, bin_size: f64) -> Self {
        let tree = KdTree::build(points);
        let raster = match mode {
            SpatialIndexMode::Exact => None,
            SpatialIndexMode::Raster => {
                let lat_bins = (std::f64::consts::PI / bin_size).ceil().max(1.0) as usize;
                Some(RasterIndex::build(&tree, lat_bins))
            }
        };
        Self { tree, raster, mode }
    }

    pub fn mode(&self) -> SpatialIndexMode {
        self.mode
    }

    /// Nearest field using the configured mode.
    pub fn nearest(&self, p: &Vec3) -> FieldId {
        match &self.raster {
            Some(raster) => raster.lookup(p),
            None => self.nearest_exact(p),
        }
    }

    pub fn nearest_exact(&self, p: &Vec3) -> FieldId {
        self.tree.nearest(p).map(|(id, _)| id).unwrap_or(NORTH_POLE)
    }

    pub fn k_nearest(&self, p: &Vec3, k: usize) -> Vec<FieldId> {
        self.tree.k_nearest(p, k).into_iter().map(|(id, _)| id).collect()
    }

    /// Bytes held by the raster cache (zero in exact mode).
    pub fn raster_memory_bytes(&self) -> usize {
        self.raster.as_ref().map(|r| r.memory_bytes()).unwrap_or(0)
    }
}

// ── Grid ─────────────────────────────────────────────────────────────────────

pub struct GeodesicGrid {
    divisions: u32,
    fields: Vec<GridField>,
    field_diameter: f64,
    field_area: f64,
    index: SpatialIndex,
}

impl GeodesicGrid {
    /// Build a grid with an exact spatial index.
    pub fn new(divisions: u32) -> Result<Self> {
        Self::with_index(divisions, SpatialIndexMode::Exact, 4.0)
    }

    pub fn from_config(config: &SimConfig) -> Result<Self> {
        Self::with_index(config.divisions, config.spatial_index, config.raster_bins_per_field)
    }

    /// Build a grid; `bins_per_field` sets the raster resolution relative to
    /// the field diameter and is ignored in exact mode.
    pub fn with_index(divisions: u32, mode: SpatialIndexMode, bins_per_field: f64) -> Result<Self> {
        if divisions < 1 {
            return Err(TectoError::InvalidDivisions(divisions));
        }
        let d = divisions as usize;
        let n = Self::field_count_for(divisions);

        let corners = icosahedron_vertices();
        let mut positions = vec![Vec3::zeros(); n];
        positions[NORTH_POLE as usize] = corners.north;
        positions[SOUTH_POLE as usize] = corners.south;

        for p in 0..5 {
            for half in [Half::Top, Half::Bottom] {
                let [o, a, b, c] = corners.rhombus(p, half);
                for i in 1..=d {
                    for j in 0..d {
                        let id = owned_id(d, p, half, i, j);
                        positions[id as usize] = lattice_position(&o, &a, &b, &c, d, i, j);
                    }
                }
            }
        }

        let mut adjacency = vec![Adjacency::empty(); n];
        let mut link = |a: FieldId, b: FieldId| {
            if a != b {
                adjacency[a as usize].insert(b);
                adjacency[b as usize].insert(a);
            }
        };
        for p in 0..5 {
            for half in [Half::Top, Half::Bottom] {
                let id = |i: usize, j: usize| resolve_id(d, p, half, i, j);
                for i in 0..d {
                    for j in 0..d {
                        let (a, b, c) = (id(i, j), id(i + 1, j), id(i, j + 1));
                        link(a, b);
                        link(b, c);
                        link(c, a);
                        let e = id(i + 1, j + 1);
                        link(b, e);
                        link(e, c);
                    }
                }
            }
        }

        let fields: Vec<GridField> = positions
            .into_iter()
            .zip(adjacency)
            .enumerate()
            .map(|(id, (position, adjacent))| GridField { id: id as FieldId, position: position.normalize(), adjacent })
            .collect();

        let mut total = 0.0;
        let mut edges = 0usize;
        for f in &fields {
            for &nb in f.adjacent.as_slice() {
                total += great_circle_distance_rad(&f.position, &fields[nb as usize].position);
                edges += 1;
            }
        }
        let field_diameter = total / edges.max(1) as f64;
        let field_area = 4.0 * std::f64::consts::PI / n as f64;

        let points: Vec<(FieldId, Vec3)> = fields.iter().map(|f| (f.id, f.position)).collect();
        let index = SpatialIndex::build(&points, mode, field_diameter / bins_per_field.max(1e-3));

        Ok(Self { divisions, fields, field_diameter, field_area, index })
    }

    /// Number of fields for a given subdivision parameter.
    pub fn field_count_for(divisions: u32) -> usize {
        let d = divisions as usize;
        10 * d * d + 2
    }

    pub fn divisions(&self) -> u32 {
        self.divisions
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[GridField] {
        &self.fields
    }

    pub fn position(&self, id: FieldId) -> &Vec3 {
        &self.fields[id as usize].position
    }

    pub fn neighbors(&self, id: FieldId) -> &[FieldId] {
        self.fields[id as usize].adjacent.as_slice()
    }

    pub fn contains(&self, id: FieldId) -> bool {
        (id as usize) < self.fields.len()
    }

    pub fn is_pentagon(&self, id: FieldId) -> bool {
        self.fields[id as usize].adjacent.len() == 5
    }

    /// Mean great-circle distance between neighbouring field centres (radians).
    pub fn field_diameter(&self) -> f64 {
        self.field_diameter
    }

    /// Area of one field on the unit sphere (steradians).
    pub fn field_area(&self) -> f64 {
        self.field_area
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Field closest to `p` (a local, unit-sphere position).
    pub fn nearest(&self, p: &Vec3) -> FieldId {
        self.index.nearest(p)
    }

    pub fn nearest_exact(&self, p: &Vec3) -> FieldId {
        self.index.nearest_exact(p)
    }

    /// Fields within `rings` hops of `id`, with their hop distance, excluding `id`.
    pub fn rings(&self, id: FieldId, rings: usize) -> Vec<(FieldId, usize)> {
        let mut out = Vec::new();
        if rings == 0 {
            return out;
        }
        let mut seen = vec![id];
        let mut queue = VecDeque::from([(id, 0usize)]);
        while let Some((cur, depth)) = queue.pop_front() {
            if depth == rings {
                continue;
            }
            for &nb in self.neighbors(cur) {
                if !seen.contains(&nb) {
                    seen.push(nb);
                    out.push((nb, depth + 1));
                    queue.push_back((nb, depth + 1));
                }
            }
        }
        out
    }
}

// ── Construction helpers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    Top,
    Bottom,
}

struct Corners {
    north: Vec3,
    south: Vec3,
    upper: [Vec3; 5],
    lower: [Vec3; 5],
}

impl Corners {
    /// `[origin, (d,0), (0,d), (d,d)]` corners of a rhombus.
    fn rhombus(&self, p: usize, half: Half) -> [Vec3; 4] {
        let q = (p + 1) % 5;
        match half {
            Half::Top => [self.north, self.upper[p], self.upper[q], self.lower[p]],
            Half::Bottom => [self.upper[q], self.lower[p], self.lower[q], self.south],
        }
    }
}

/// Poles plus the two tropical pentagon rows, in closed form.
fn icosahedron_vertices() -> Corners {
    let lat = 0.5f64.atan();
    let at = |lat: f64, lon_deg: f64| {
        let lon = lon_deg.to_radians();
        Vec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
    };
    Corners {
        north: Vec3::new(0.0, 0.0, 1.0),
        south: Vec3::new(0.0, 0.0, -1.0),
        upper: std::array::from_fn(|p| at(lat, 72.0 * p as f64)),
        lower: std::array::from_fn(|p| at(-lat, 72.0 * p as f64 + 36.0)),
    }
}

fn owned_id(d: usize, p: usize, half: Half, i: usize, j: usize) -> FieldId {
    let r = match half {
        Half::Top => 0,
        Half::Bottom => 1,
    };
    (2 + p * 2 * d * d + r * d * d + (i - 1) * d + j) as FieldId
}

/// Map any lattice coordinate `0..=d` of a rhombus to the owning field id.
fn resolve_id(d: usize, p: usize, half: Half, i: usize, j: usize) -> FieldId {
    let next = (p + 1) % 5;
    match half {
        Half::Top => {
            if i == 0 && j == 0 {
                NORTH_POLE
            } else if i == 0 {
                resolve_id(d, next, Half::Top, j, 0)
            } else if j == d {
                resolve_id(d, p, Half::Bottom, i, 0)
            } else {
                owned_id(d, p, half, i, j)
            }
        }
        Half::Bottom => {
            if i == d && j == d {
                SOUTH_POLE
            } else if i == 0 {
                resolve_id(d, next, Half::Top, d, j)
            } else if j == d {
                resolve_id(d, next, Half::Bottom, d, i)
            } else {
                owned_id(d, p, half, i, j)
            }
        }
    }
}

/// Great-circle interpolation inside a rhombus split along its (d,0)–(0,d) diagonal.
fn lattice_position(o: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3, d: usize, i: usize, j: usize) -> Vec3 {
    let df = d as f64;
    if i + j <= d {
        let k = i + j;
        if k == 0 {
            return *o;
        }
        let e1 = slerp(o, a, k as f64 / df);
        let e2 = slerp(o, b, k as f64 / df);
        slerp(&e1, &e2, j as f64 / k as f64)
    } else {
        let m = 2 * d - i - j;
        if m == 0 {
            return *c;
        }
        let e1 = slerp(c, a, m as f64 / df);
        let e2 = slerp(c, b, m as f64 / df);
        slerp(&e1, &e2, (d - i) as f64 / m as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::random_sphere_point;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn field_count_matches_formula() {
        for d in 1..=6 {
            let grid = GeodesicGrid::new(d).unwrap();
            assert_eq!(grid.len(), 10 * (d as usize).pow(2) + 2);
        }
    }

    #[test]
    fn zero_divisions_rejected() {
        assert!(matches!(GeodesicGrid::new(0), Err(TectoError::InvalidDivisions(0))));
    }

    #[test]
    fn adjacency_is_symmetric() {
        let grid = GeodesicGrid::new(5).unwrap();
        for f in grid.fields() {
            for &nb in f.adjacent.as_slice() {
                assert!(grid.neighbors(nb).contains(&f.id), "{} lists {} but not back", f.id, nb);
            }
        }
    }

    #[test]
    fn exactly_twelve_pentagons() {
        for d in 1..=5 {
            let grid = GeodesicGrid::new(d).unwrap();
            let pentagons = grid.fields().iter().filter(|f| f.adjacent.len() == 5).count();
            let hexagons = grid.fields().iter().filter(|f| f.adjacent.len() == 6).count();
            assert_eq!(pentagons, 12, "d={d}");
            assert_eq!(pentagons + hexagons, grid.len(), "d={d}");
        }
        let grid = GeodesicGrid::new(3).unwrap();
        assert!(grid.is_pentagon(NORTH_POLE));
        assert!(grid.is_pentagon(SOUTH_POLE));
    }

    #[test]
    fn adjacency_ignores_repeats() {
        let mut a = Adjacency::empty();
        for id in [7, 3, 7, 5] {
            a.insert(id);
        }
        assert_eq!(a.as_slice(), &[3, 5, 7]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "more than six neighbours")]
    fn seventh_neighbour_is_a_broken_grid() {
        let mut a = Adjacency::empty();
        for id in 0..7 {
            a.insert(id);
        }
    }

    #[test]
    fn positions_are_unit_and_distinct() {
        let grid = GeodesicGrid::new(6).unwrap();
        for f in grid.fields() {
            assert_relative_eq!(f.position.norm(), 1.0, epsilon = 1e-12);
        }
        for f in grid.fields() {
            for &nb in f.adjacent.as_slice() {
                let dist = great_circle_distance_rad(&f.position, grid.position(nb));
                assert!(dist > 0.3 * grid.field_diameter() && dist < 2.0 * grid.field_diameter());
            }
        }
    }

    #[test]
    fn field_area_sums_to_sphere() {
        let grid = GeodesicGrid::new(4).unwrap();
        assert_relative_eq!(grid.field_area() * grid.len() as f64, 4.0 * std::f64::consts::PI, epsilon = 1e-9);
    }

    #[test]
    fn nearest_of_own_position_is_self() {
        let grid = GeodesicGrid::with_index(6, SpatialIndexMode::Raster, 4.0).unwrap();
        for f in grid.fields() {
            assert_eq!(grid.nearest_exact(&f.position), f.id);
        }
    }

    #[test]
    fn raster_is_exact_or_a_neighbour() {
        let grid = GeodesicGrid::with_index(8, SpatialIndexMode::Raster, 4.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut exact_hits = 0;
        for _ in 0..1000 {
            let p = random_sphere_point(&mut rng);
            let exact = grid.nearest_exact(&p);
            let approx = grid.nearest(&p);
            if exact == approx {
                exact_hits += 1;
            } else {
                assert!(grid.neighbors(exact).contains(&approx));
            }
        }
        assert!(exact_hits > 800, "raster too inaccurate: {exact_hits}/1000");
    }

    #[test]
    fn rings_grow_outward() {
        let grid = GeodesicGrid::new(6).unwrap();
        let id = 100;
        let one = grid.rings(id, 1);
        assert_eq!(one.len(), grid.neighbors(id).len());
        let two = grid.rings(id, 2);
        assert!(two.len() > one.len());
        assert!(two.iter().all(|&(_, r)| r == 1 || r == 2));
    }
}
