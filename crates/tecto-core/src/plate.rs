//! Rigid plates and their subplates.
//!
//! A plate owns a set of grid fields expressed in its own (local) frame; its
//! orientation quaternion maps local grid positions to world positions. Field
//! maps are `BTreeMap`s so every iteration order is deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use nalgebra::{Matrix3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::field::Field;
use crate::grid::{FieldId, GeodesicGrid};
use crate::sphere::Vec3;

pub type PlateId = u32;

/// Density offset that keeps a subplate below its host.
pub const SUBPLATE_DENSITY_EPSILON: f64 = 0.01;

// ── Hotspot ──────────────────────────────────────────────────────────────────

/// Mantle plume pushing on a plate; fixed in world space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotSpot {
    pub position: Vec3,
    pub force: Vec3,
}

impl Default for HotSpot {
    fn default() -> Self {
        Self { position: Vec3::new(0.0, 0.0, 1.0), force: Vec3::zeros() }
    }
}

impl HotSpot {
    pub fn torque(&self) -> Vec3 {
        self.position.cross(&self.force)
    }

    /// Shrink the force magnitude linearly toward zero.
    pub fn decay(&mut self, rate: f64, dt: f64) {
        let magnitude = self.force.norm();
        if magnitude <= 0.0 {
            return;
        }
        let next = (magnitude - rate * dt).max(0.0);
        self.force *= next / magnitude;
    }
}

// ── Subplate ─────────────────────────────────────────────────────────────────

/// Detached slab riding beneath its host plate with the host's orientation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subplate {
    pub id: PlateId,
    pub fields: BTreeMap<FieldId, Field>,
}

// ── Plate ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Plate {
    pub id: PlateId,
    pub density: f64,
    /// Visual identity in [0, 1); no physical meaning.
    pub hue: f64,
    pub quaternion: UnitQuaternion<f64>,
    pub angular_velocity: Vec3,
    /// Last evaluated angular acceleration (the Verlet half-kick cache).
    pub angular_acceleration: Vec3,
    pub mass: f64,
    /// Inertia tensor in the local frame.
    pub inertia_local: Matrix3<f64>,
    pub inv_inertia_local: Matrix3<f64>,
    /// Label anchor in the local frame; `None` when too few safe fields exist.
    pub center: Option<Vec3>,
    pub hot_spot: HotSpot,
    pub fields: BTreeMap<FieldId, Field>,
    /// Unowned neighbours of the boundary that the plate may grow into.
    pub adjacent_fields: BTreeMap<FieldId, Field>,
    pub subplate: Subplate,
    /// World-frame velocities that colliding plates drag owned fields toward.
    pub drag_targets: BTreeMap<FieldId, Vec3>,
    dirty: bool,
}

impl Plate {
    pub fn new(id: PlateId, density: f64, hue: f64) -> Self {
        Self {
            id,
            density,
            hue,
            quaternion: UnitQuaternion::identity(),
            angular_velocity: Vec3::zeros(),
            angular_acceleration: Vec3::zeros(),
            mass: 0.0,
            inertia_local: Matrix3::identity(),
            inv_inertia_local: Matrix3::identity(),
            center: None,
            hot_spot: HotSpot::default(),
            fields: BTreeMap::new(),
            adjacent_fields: BTreeMap::new(),
            subplate: Subplate { id, fields: BTreeMap::new() },
            drag_targets: BTreeMap::new(),
            dirty: true,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Used when mass properties are restored rather than recomputed.
    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn subplate_density(&self) -> f64 {
        self.density + SUBPLATE_DENSITY_EPSILON
    }

    // ── Frames ─────────────────────────────────────────────────────────────

    pub fn absolute_position(&self, grid: &GeodesicGrid, id: FieldId) -> Vec3 {
        self.quaternion * grid.position(id)
    }

    pub fn local_position(&self, absolute: &Vec3) -> Vec3 {
        self.quaternion.inverse_transform_vector(absolute)
    }

    /// Surface velocity of the plate at a world position.
    pub fn linear_velocity(&self, absolute: &Vec3) -> Vec3 {
        self.angular_velocity.cross(absolute)
    }

    /// Grid id under a world position, in this plate's frame.
    pub fn grid_id_at(&self, grid: &GeodesicGrid, absolute: &Vec3) -> FieldId {
        grid.nearest(&self.local_position(absolute))
    }

    /// Owned field under a world position, if any.
    pub fn field_at(&self, grid: &GeodesicGrid, absolute: &Vec3) -> Option<FieldId> {
        let id = self.grid_id_at(grid, absolute);
        self.fields.contains_key(&id).then_some(id)
    }

    pub fn subplate_field_at(&self, grid: &GeodesicGrid, absolute: &Vec3) -> Option<FieldId> {
        let id = self.grid_id_at(grid, absolute);
        self.subplate.fields.contains_key(&id).then_some(id)
    }

    // ── Ownership ──────────────────────────────────────────────────────────

    pub fn insert_field(&mut self, field: Field) {
        self.adjacent_fields.remove(&field.id);
        self.fields.insert(field.id, field);
        self.dirty = true;
    }

    pub fn take_field(&mut self, id: FieldId) -> Option<Field> {
        let field = self.fields.remove(&id);
        if field.is_some() {
            self.drag_targets.remove(&id);
            self.dirty = true;
        }
        field
    }

    /// Recompute every owned field's boundary flag.
    pub fn update_boundaries(&mut self, grid: &GeodesicGrid) {
        let owned: BTreeSet<FieldId> = self.fields.keys().copied().collect();
        for (id, field) in self.fields.iter_mut() {
            field.boundary = grid.neighbors(*id).iter().any(|nb| !owned.contains(nb));
        }
    }

    /// Rebuild the candidate set from current boundary fields, keeping the
    /// accumulated travel of candidates that remain adjacent.
    pub fn update_adjacent_fields(&mut self, grid: &GeodesicGrid) {
        let mut wanted = BTreeSet::new();
        for (id, field) in &self.fields {
            if !field.boundary {
                continue;
            }
            for nb in grid.neighbors(*id) {
                if !self.fields.contains_key(nb) {
                    wanted.insert(*nb);
                }
            }
        }
        self.adjacent_fields.retain(|id, _| wanted.contains(id));
        for id in wanted {
            self.adjacent_fields.entry(id).or_insert_with(|| Field::oceanic(id));
        }
    }

    pub fn owned_neighbor_count(&self, grid: &GeodesicGrid, id: FieldId) -> usize {
        grid.neighbors(id).iter().filter(|nb| self.fields.contains_key(nb)).count()
    }

    /// Oceanic field with a continental neighbour in this plate.
    pub fn is_continent_buffer(&self, grid: &GeodesicGrid, id: FieldId) -> bool {
        let Some(field) = self.fields.get(&id) else {
            return false;
        };
        field.is_oceanic()
            && grid
                .neighbors(id)
                .iter()
                .any(|nb| self.fields.get(nb).is_some_and(|f| f.is_continental()))
    }

    /// Size of the continental component containing `id`, counting at most
    /// `limit + 1` fields.
    pub fn continent_size(&self, grid: &GeodesicGrid, id: FieldId, limit: usize) -> usize {
        if !self.fields.get(&id).is_some_and(|f| f.is_continental()) {
            return 0;
        }
        let mut seen = BTreeSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(cur) = queue.pop_front() {
            if seen.len() > limit {
                break;
            }
            for nb in grid.neighbors(cur) {
                if self.fields.get(nb).is_some_and(|f| f.is_continental()) && seen.insert(*nb) {
                    queue.push_back(*nb);
                }
            }
        }
        seen.len()
    }

    pub fn is_island(&self, grid: &GeodesicGrid, id: FieldId, max_size: usize) -> bool {
        let size = self.continent_size(grid, id, max_size);
        size > 0 && size <= max_size
    }

    // ── Physics ────────────────────────────────────────────────────────────

    /// Rebuild mass and inertia from owned fields. Each field is a point mass
    /// plus a small disc term so single-field plates stay invertible.
    pub fn update_inertia(&mut self, grid: &GeodesicGrid, config: &SimConfig) {
        let area = grid.field_area();
        let radius = grid.field_diameter() * 0.5;
        let mut mass = 0.0;
        let mut inertia = Matrix3::zeros();
        for (id, field) in &self.fields {
            let density = if field.is_continental() {
                config.continental_field_density
            } else {
                config.oceanic_field_density
            };
            let m = area * density;
            let r = grid.position(*id);
            inertia += (Matrix3::identity() - r * r.transpose()) * m;
            inertia += Matrix3::identity() * (m * radius * radius * 0.25);
            mass += m;
        }
        self.mass = mass;
        if mass > 0.0 {
            self.inertia_local = inertia;
            self.inv_inertia_local = inertia.try_inverse().unwrap_or_else(Matrix3::zeros);
        }
        self.dirty = false;
    }

    /// Inverse inertia tensor in world frame for orientation `q`.
    pub fn world_inv_inertia(&self, q: &UnitQuaternion<f64>) -> Matrix3<f64> {
        let r = q.to_rotation_matrix().into_inner();
        r * self.inv_inertia_local * r.transpose()
    }

    /// Drag force on an owned field at world position `p` under angular velocity `omega`.
    fn drag_force(&self, config: &SimConfig, area: f64, id: FieldId, p: &Vec3, omega: &Vec3) -> Vec3 {
        let v = omega.cross(p);
        let mut force = -v * (config.linear_drag * area);
        if let Some(target) = self.drag_targets.get(&id) {
            let dv = target - v;
            let speed = dv.norm();
            if speed > 1e-12 {
                force += dv / speed * (config.collision_drag * area * speed.powf(config.collision_drag_exponent));
            }
        }
        force
    }

    /// Current force on one owned field, world frame.
    pub fn field_force(&self, grid: &GeodesicGrid, config: &SimConfig, id: FieldId) -> Vec3 {
        let p = self.absolute_position(grid, id);
        self.drag_force(config, grid.field_area(), id, &p, &self.angular_velocity)
    }

    /// Net torque at orientation `q` and angular velocity `omega`.
    pub fn torque(&self, grid: &GeodesicGrid, config: &SimConfig, q: &UnitQuaternion<f64>, omega: &Vec3) -> Vec3 {
        let area = grid.field_area();
        let mut torque = self.hot_spot.torque();
        for id in self.fields.keys() {
            let p = q * grid.position(*id);
            torque += p.cross(&self.drag_force(config, area, *id, &p, omega));
        }
        torque
    }

    pub fn acceleration(&self, grid: &GeodesicGrid, config: &SimConfig, q: &UnitQuaternion<f64>, omega: &Vec3) -> Vec3 {
        self.world_inv_inertia(q) * self.torque(grid, config, q, omega)
    }

    pub fn kinetic_energy(&self) -> f64 {
        let r = self.quaternion.to_rotation_matrix().into_inner();
        let inertia = r * self.inertia_local * r.transpose();
        0.5 * self.angular_velocity.dot(&(inertia * self.angular_velocity))
    }

    pub fn clamp_angular_speed(&mut self, max: f64) {
        let speed = self.angular_velocity.norm();
        if speed > max {
            self.angular_velocity *= max / speed;
        }
    }

    /// Average the local positions of fields far from any subduction.
    pub fn update_center(&mut self, grid: &GeodesicGrid, config: &SimConfig) {
        let mut sum = Vec3::zeros();
        let mut count = 0usize;
        for (id, field) in &self.fields {
            if field.subduction.is_some() {
                continue;
            }
            let near_slab = grid
                .neighbors(*id)
                .iter()
                .any(|nb| self.fields.get(nb).is_some_and(|f| f.subduction.is_some()));
            if !near_slab {
                sum += grid.position(*id);
                count += 1;
            }
        }
        self.center = if count >= config.min_center_fields && sum.norm() > 1e-9 {
            Some(sum.normalize())
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cap_plate(grid: &GeodesicGrid, id: PlateId, z_min: f64) -> Plate {
        let mut p = Plate::new(id, 0.0, 0.0);
        for f in grid.fields() {
            if f.position.z > z_min {
                p.insert_field(Field::oceanic(f.id));
            }
        }
        p.update_boundaries(grid);
        p.update_adjacent_fields(grid);
        p
    }

    #[test]
    fn hot_spot_decays_linearly_to_zero() {
        let mut h = HotSpot { position: Vec3::new(1.0, 0.0, 0.0), force: Vec3::new(0.0, 0.3, 0.4) };
        h.decay(0.1, 1.0);
        assert_relative_eq!(h.force.norm(), 0.4, epsilon = 1e-12);
        h.decay(0.1, 10.0);
        assert_eq!(h.force.norm(), 0.0);
    }

    #[test]
    fn boundaries_and_candidates() {
        let grid = GeodesicGrid::new(6).unwrap();
        let p = cap_plate(&grid, 1, 0.5);
        let boundary = p.fields.values().filter(|f| f.boundary).count();
        assert!(boundary > 0 && boundary < p.len());
        for id in p.adjacent_fields.keys() {
            assert!(!p.fields.contains_key(id));
            assert!(grid.neighbors(*id).iter().any(|nb| p.fields.contains_key(nb)));
        }
    }

    #[test]
    fn inertia_is_symmetric_positive() {
        let grid = GeodesicGrid::new(5).unwrap();
        let c = SimConfig::default();
        let mut p = cap_plate(&grid, 1, 0.0);
        p.update_inertia(&grid, &c);
        assert!(!p.is_dirty());
        assert_relative_eq!(p.mass, p.len() as f64 * grid.field_area() * c.oceanic_field_density, epsilon = 1e-9);
        let i = p.inertia_local;
        assert_relative_eq!(i, i.transpose(), epsilon = 1e-12);
        let id = i * p.inv_inertia_local;
        assert_relative_eq!(id, Matrix3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn drag_opposes_rotation() {
        let grid = GeodesicGrid::new(5).unwrap();
        let c = SimConfig::default();
        let mut p = cap_plate(&grid, 1, -1.1);
        p.update_inertia(&grid, &c);
        p.angular_velocity = Vec3::new(0.0, 0.0, 0.02);
        let a = p.acceleration(&grid, &c, &p.quaternion, &p.angular_velocity);
        assert!(a.dot(&p.angular_velocity) < 0.0);
    }

    #[test]
    fn hot_spot_spins_plate_up() {
        let grid = GeodesicGrid::new(5).unwrap();
        let c = SimConfig::default();
        let mut p = cap_plate(&grid, 1, 0.0);
        p.update_inertia(&grid, &c);
        p.hot_spot = HotSpot { position: Vec3::new(1.0, 0.0, 0.0), force: Vec3::new(0.0, 0.01, 0.0) };
        let a = p.acceleration(&grid, &c, &p.quaternion, &Vec3::zeros());
        assert!(a.z > 0.0);
    }

    #[test]
    fn field_lookup_follows_rotation() {
        let grid = GeodesicGrid::new(6).unwrap();
        let mut p = cap_plate(&grid, 1, 0.5);
        let north = Vec3::new(0.0, 0.0, 1.0);
        assert!(p.field_at(&grid, &north).is_some());
        p.quaternion = UnitQuaternion::from_scaled_axis(Vec3::new(std::f64::consts::PI, 0.0, 0.0));
        assert!(p.field_at(&grid, &north).is_none());
        assert!(p.field_at(&grid, &-north).is_some());
    }

    #[test]
    fn center_requires_safe_fields() {
        let grid = GeodesicGrid::new(6).unwrap();
        let c = SimConfig::default();
        let mut p = cap_plate(&grid, 1, 0.5);
        p.update_center(&grid, &c);
        let center = p.center.unwrap();
        assert!(center.z > 0.99);

        let mut tiny = Plate::new(2, 1.0, 0.0);
        tiny.insert_field(Field::oceanic(0));
        tiny.update_center(&grid, &c);
        assert!(tiny.center.is_none());
    }

    #[test]
    fn islands_and_buffers() {
        let grid = GeodesicGrid::new(6).unwrap();
        let mut p = cap_plate(&grid, 1, 0.0);
        let id = 0;
        p.fields.insert(id, Field::continental(id));
        assert!(p.is_island(&grid, id, 5));
        let nb = grid.neighbors(id)[0];
        assert!(p.is_continent_buffer(&grid, nb));
        assert!(!p.is_continent_buffer(&grid, id));
    }
}
