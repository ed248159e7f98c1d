//! Top-level simulation state and the per-step orchestration.
//!
//! One call to [`Model::step`] runs, in order: integration, angular speed
//! clamping and the divergence guard, collision detection and resolution,
//! geological process updates, removal of dead fields and empty plates, growth
//! at divergent boundaries, inertia refresh, the second integrator half,
//! periodic center updates, hotspot decay, plate division and stall handling.
//! Between steps every transient field flag is cleared.

pub mod collisions;
pub mod geology;
pub mod lifecycle;
pub mod output;
pub mod presets;
pub mod snapshot;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::SimConfig;
use crate::crust::Crust;
use crate::error::{Result, TectoError};
use crate::grid::{FieldId, GeodesicGrid};
use crate::integrators;
use crate::plate::{HotSpot, Plate, PlateId};
use crate::sphere::Vec3;

pub use output::{CrossSection, CrossSectionPoint, CrossSectionSegment, FieldInfo, ModelOutput, OutputChannels, PlateOutput};
pub use presets::SeedImage;
pub use snapshot::{ModelRecord, PlateRecord, RngState};

/// Result of a call to [`Model::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced,
    /// Kinetic energy exceeded its bound; the model no longer advances.
    Diverged,
}

pub struct Model {
    config: SimConfig,
    grid: Arc<GeodesicGrid>,
    time: f64,
    step_idx: u64,
    rng: ChaCha8Rng,
    /// Sorted ascending by density.
    plates: Vec<Plate>,
    next_plate_id: PlateId,
    diverged: bool,
    stall_time: f64,
}

impl Model {
    /// Empty model with a freshly built grid.
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let grid = Arc::new(GeodesicGrid::from_config(&config)?);
        Self::with_grid(config, grid)
    }

    /// Empty model sharing an existing grid.
    pub fn with_grid(config: SimConfig, grid: Arc<GeodesicGrid>) -> Result<Self> {
        config.validate()?;
        if grid.divisions() != config.divisions {
            return Err(TectoError::InvalidConfig(format!(
                "grid has {} divisions but configuration asks for {}",
                grid.divisions(),
                config.divisions
            )));
        }
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            grid,
            time: 0.0,
            step_idx: 0,
            rng,
            plates: Vec::new(),
            next_plate_id: 0,
            diverged: false,
            stall_time: 0.0,
        })
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SimConfig {
        &mut self.config
    }

    pub fn grid(&self) -> &GeodesicGrid {
        &self.grid
    }

    pub fn shared_grid(&self) -> Arc<GeodesicGrid> {
        Arc::clone(&self.grid)
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step_idx(&self) -> u64 {
        self.step_idx
    }

    pub fn is_diverged(&self) -> bool {
        self.diverged
    }

    pub fn plates(&self) -> &[Plate] {
        &self.plates
    }

    pub fn plate(&self, id: PlateId) -> Option<&Plate> {
        self.plates.iter().find(|p| p.id == id)
    }

    pub fn plate_mut(&mut self, id: PlateId) -> Option<&mut Plate> {
        self.plates.iter_mut().find(|p| p.id == id)
    }

    pub(crate) fn plate_index(&self, id: PlateId) -> Option<usize> {
        self.plates.iter().position(|p| p.id == id)
    }

    pub fn field_count(&self) -> usize {
        self.plates.iter().map(|p| p.len()).sum()
    }

    pub fn total_kinetic_energy(&self) -> f64 {
        self.plates.iter().map(|p| p.kinetic_energy()).sum()
    }

    // ── Construction helpers ───────────────────────────────────────────────

    /// Append an empty plate with the next id, densest so far.
    pub fn add_plate(&mut self, hue: f64) -> PlateId {
        let id = self.next_plate_id;
        self.next_plate_id += 1;
        let density = self.plates.len() as f64;
        self.plates.push(Plate::new(id, density, hue));
        id
    }

    /// Recompute boundaries, candidates, inertia and centers for every plate.
    pub fn refresh_plates(&mut self) {
        let grid = Arc::clone(&self.grid);
        for plate in &mut self.plates {
            plate.update_boundaries(&grid);
            plate.update_adjacent_fields(&grid);
            plate.update_inertia(&grid, &self.config);
            plate.update_center(&grid, &self.config);
        }
        lifecycle::normalize_densities(&mut self.plates);
    }

    /// Move field `id` between plates, keeping it in exactly one owner.
    pub fn transfer_field(&mut self, from: PlateId, to: PlateId, id: FieldId) -> Result<bool> {
        let a = self.plate_index(from).ok_or(TectoError::UnknownPlate(from))?;
        let b = self.plate_index(to).ok_or(TectoError::UnknownPlate(to))?;
        Ok(transfer_field(&mut self.plates, a, b, id))
    }

    // ── Stepping ───────────────────────────────────────────────────────────

    pub fn step(&mut self) -> StepOutcome {
        let dt = self.config.timestep;
        self.step_with(dt)
    }

    pub fn step_with(&mut self, dt: f64) -> StepOutcome {
        if self.diverged {
            return StepOutcome::Diverged;
        }
        let grid = Arc::clone(&self.grid);
        let scheme = self.config.integration;

        integrators::before_interactions(scheme, &mut self.plates, &grid, &self.config, dt);
        for plate in &mut self.plates {
            plate.clamp_angular_speed(self.config.max_angular_speed);
            plate.drag_targets.clear();
        }
        if self.check_divergence() {
            return StepOutcome::Diverged;
        }

        collisions::detect_and_resolve(self, dt);
        geology::update_fields(self, dt);

        lifecycle::remove_dead_fields(self);
        lifecycle::refresh_topology(self);
        lifecycle::grow_plates(self, dt);
        lifecycle::refresh_topology(self);
        for plate in &mut self.plates {
            if plate.is_dirty() {
                plate.update_inertia(&grid, &self.config);
            }
        }

        integrators::after_interactions(scheme, &mut self.plates, &grid, &self.config, dt);

        if self.step_idx % self.config.center_update_interval == 0 {
            for plate in &mut self.plates {
                plate.update_center(&grid, &self.config);
            }
        }
        if !self.config.constant_hot_spots {
            for plate in &mut self.plates {
                plate.hot_spot.decay(self.config.hot_spot_decay, dt);
            }
        }

        lifecycle::divide_plates(self);
        lifecycle::handle_stall(self, dt);

        for plate in &mut self.plates {
            for field in plate.fields.values_mut() {
                field.reset_transient();
            }
            for field in plate.subplate.fields.values_mut() {
                field.reset_transient();
            }
        }

        self.time += dt;
        self.step_idx += 1;
        debug!(
            "step {} t={:.3} plates={} fields={}",
            self.step_idx,
            self.time,
            self.plates.len(),
            self.field_count()
        );
        StepOutcome::Advanced
    }

    fn check_divergence(&mut self) -> bool {
        let energy = self.total_kinetic_energy();
        let finite = self
            .plates
            .iter()
            .all(|p| p.angular_velocity.iter().all(|v| v.is_finite()) && p.quaternion.coords.iter().all(|v| v.is_finite()));
        if !finite || !energy.is_finite() || energy > self.config.max_kinetic_energy {
            warn!("model diverged at step {} (kinetic energy {energy})", self.step_idx);
            self.diverged = true;
        }
        self.diverged
    }

    // ── Queries ────────────────────────────────────────────────────────────

    /// Least dense plate owning a field at world position `p`.
    pub fn top_field_at(&self, p: &Vec3) -> Option<(PlateId, FieldId)> {
        let p = p.normalize();
        self.plates.iter().find_map(|plate| plate.field_at(&self.grid, &p).map(|f| (plate.id, f)))
    }

    pub fn field_info(&self, p: &Vec3) -> Option<FieldInfo> {
        let (plate_id, field_id) = self.top_field_at(p)?;
        let plate = self.plate(plate_id)?;
        let field = plate.fields.get(&field_id)?;
        Some(FieldInfo::new(&self.config, &self.grid, plate, field))
    }

    // ── Edits ──────────────────────────────────────────────────────────────

    pub fn set_hot_spot(&mut self, position: Vec3, force: Vec3) -> Option<PlateId> {
        let position = position.normalize();
        let (plate_id, _) = self.top_field_at(&position)?;
        let plate = self.plate_mut(plate_id)?;
        plate.hot_spot = HotSpot { position, force };
        Some(plate_id)
    }

    pub fn set_densities(&mut self, densities: &BTreeMap<PlateId, f64>) -> Result<()> {
        for id in densities.keys() {
            if self.plate_index(*id).is_none() {
                return Err(TectoError::UnknownPlate(*id));
            }
        }
        for plate in &mut self.plates {
            if let Some(d) = densities.get(&plate.id) {
                plate.density = *d;
            }
        }
        lifecycle::normalize_densities(&mut self.plates);
        Ok(())
    }

    /// Paint continental crust on the field under `p` and its neighbours.
    pub fn draw_continent(&mut self, p: &Vec3) -> bool {
        self.paint(p, Crust::continental)
    }

    pub fn erase_continent(&mut self, p: &Vec3) -> bool {
        self.paint(p, Crust::oceanic)
    }

    fn paint(&mut self, p: &Vec3, crust: fn() -> Crust) -> bool {
        let Some((plate_id, field_id)) = self.top_field_at(p) else {
            return false;
        };
        let grid = Arc::clone(&self.grid);
        let config = &self.config;
        let Some(plate) = self.plates.iter_mut().find(|pl| pl.id == plate_id) else {
            return false;
        };
        let mut targets = vec![field_id];
        targets.extend_from_slice(grid.neighbors(field_id));
        for id in targets {
            if let Some(field) = plate.fields.get_mut(&id) {
                field.crust = crust();
                field.subduction = None;
            }
        }
        plate.mark_dirty();
        plate.update_inertia(&grid, config);
        true
    }

    /// Set the marker flag on every island field.
    pub fn mark_islands(&mut self) -> usize {
        let grid = Arc::clone(&self.grid);
        let max = self.config.island_max_size;
        let mut count = 0;
        for plate in &mut self.plates {
            let islands: Vec<FieldId> = plate
                .fields
                .keys()
                .copied()
                .filter(|id| plate.is_island(&grid, *id, max))
                .collect();
            for id in islands {
                if let Some(f) = plate.fields.get_mut(&id) {
                    f.marked = true;
                    count += 1;
                }
            }
        }
        count
    }

    pub fn mark_field(&mut self, p: &Vec3) -> bool {
        let Some((plate_id, field_id)) = self.top_field_at(p) else {
            return false;
        };
        match self.plate_mut(plate_id).and_then(|pl| pl.fields.get_mut(&field_id)) {
            Some(field) => {
                field.marked = true;
                true
            }
            None => false,
        }
    }

    pub fn unmark_all_fields(&mut self) {
        for plate in &mut self.plates {
            for field in plate.fields.values_mut() {
                field.marked = false;
            }
        }
    }
}

/// Mutable access to two distinct plates.
pub(crate) fn pair_mut(plates: &mut [Plate], a: usize, b: usize) -> (&mut Plate, &mut Plate) {
    assert_ne!(a, b, "pair_mut needs two distinct plates");
    if a < b {
        let (lo, hi) = plates.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = plates.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

/// Move one field between plates by index. Returns `false` when `from` does
/// not own it or `to` already does.
pub(crate) fn transfer_field(plates: &mut [Plate], from: usize, to: usize, id: FieldId) -> bool {
    if from == to {
        return false;
    }
    let (src, dst) = pair_mut(plates, from, to);
    if dst.fields.contains_key(&id) {
        return false;
    }
    let Some(mut field) = src.take_field(id) else {
        return false;
    };
    field.reset_transient();
    dst.insert_field(field);
    debug_assert!(!src.fields.contains_key(&id) && dst.fields.contains_key(&id));
    true
}

/// Plate with a single field per id in `ids`, used by tests.
#[cfg(test)]
pub(crate) fn fill_plate(plate: &mut Plate, ids: impl IntoIterator<Item = FieldId>, continental: bool) {
    use crate::field::Field;
    for id in ids {
        plate.insert_field(if continental { Field::continental(id) } else { Field::oceanic(id) });
    }
}
