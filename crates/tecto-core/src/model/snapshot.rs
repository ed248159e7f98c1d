//! Full model snapshots.
//!
//! A [`ModelRecord`] is a deep copy of everything a model needs to continue
//! exactly where it stopped, including the random stream position. Records
//! are only taken between steps; restoring validates the record against the
//! grid before anything is built.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::info;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::Model;
use crate::config::SimConfig;
use crate::error::{Result, TectoError};
use crate::field::Field;
use crate::grid::{FieldId, GeodesicGrid};
use crate::plate::{HotSpot, Plate, PlateId, Subplate};
use crate::sphere::Vec3;

/// Position of a ChaCha stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RngState {
    pub seed: [u8; 32],
    pub stream: u64,
    /// Word position split into `[high, low]` 64-bit halves.
    pub word_pos: [u64; 2],
}

impl RngState {
    pub fn capture(rng: &ChaCha8Rng) -> Self {
        let pos = rng.get_word_pos();
        Self { seed: rng.get_seed(), stream: rng.get_stream(), word_pos: [(pos >> 64) as u64, pos as u64] }
    }

    pub fn restore(&self) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::from_seed(self.seed);
        rng.set_stream(self.stream);
        rng.set_word_pos((u128::from(self.word_pos[0]) << 64) | u128::from(self.word_pos[1]));
        rng
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubplateRecord {
    pub id: PlateId,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// Drag velocity a colliding plate left on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragTarget {
    pub field_id: FieldId,
    pub velocity: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateRecord {
    pub id: PlateId,
    /// `[x, y, z, w]`.
    pub quaternion: [f64; 4],
    pub angular_velocity: Vec3,
    #[serde(default = "Vec3::zeros")]
    pub angular_acceleration: Vec3,
    pub hue: f64,
    pub density: f64,
    pub mass: f64,
    /// Local-frame inverse inertia tensor, row-major.
    pub inv_inertia_tensor: [f64; 9],
    pub center: Option<Vec3>,
    pub hot_spot: HotSpot,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub adjacent_fields: Vec<Field>,
    pub subplate: SubplateRecord,
    #[serde(default)]
    pub drag_targets: Vec<DragTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub divisions: u32,
    pub time: f64,
    pub step_idx: u64,
    pub rng_state: RngState,
    #[serde(default)]
    pub next_plate_id: PlateId,
    #[serde(default)]
    pub diverged: bool,
    #[serde(default)]
    pub stall_time: f64,
    pub plates: Vec<PlateRecord>,
}

impl ModelRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a record; a malformed payload is reported as an invalid snapshot.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TectoError::InvalidSnapshot(e.to_string()))
    }

    /// Check the record against a grid before anything is restored.
    pub fn validate(&self, grid: &GeodesicGrid) -> Result<()> {
        if self.divisions != grid.divisions() {
            return Err(TectoError::SnapshotGridMismatch { expected: grid.divisions(), found: self.divisions });
        }
        let mut plate_ids = BTreeSet::new();
        for plate in &self.plates {
            if !plate_ids.insert(plate.id) {
                return Err(TectoError::InvalidSnapshot(format!("duplicate plate id {}", plate.id)));
            }
            let q = Quaternion::new(plate.quaternion[3], plate.quaternion[0], plate.quaternion[1], plate.quaternion[2]);
            if !q.coords.iter().all(|v| v.is_finite()) || q.norm() < 1e-9 {
                return Err(TectoError::InvalidSnapshot(format!("plate {} has a degenerate quaternion", plate.id)));
            }
            for (kind, fields) in [
                ("field", &plate.fields),
                ("adjacent field", &plate.adjacent_fields),
                ("subplate field", &plate.subplate.fields),
            ] {
                check_ids(grid, plate.id, kind, fields.iter().map(|f| f.id))?;
            }
            check_ids(grid, plate.id, "drag target", plate.drag_targets.iter().map(|d| d.field_id))?;
        }
        Ok(())
    }
}

fn check_ids(grid: &GeodesicGrid, plate: PlateId, kind: &str, ids: impl Iterator<Item = FieldId>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !grid.contains(id) {
            return Err(TectoError::InvalidSnapshot(format!(
                "plate {plate}: {kind} id {id} outside grid of {} fields",
                grid.len()
            )));
        }
        if !seen.insert(id) {
            return Err(TectoError::InvalidSnapshot(format!("plate {plate}: duplicate {kind} id {id}")));
        }
    }
    Ok(())
}

impl PlateRecord {
    fn capture(plate: &Plate) -> Self {
        let q = plate.quaternion.coords;
        let inv = plate.inv_inertia_local;
        Self {
            id: plate.id,
            quaternion: [q.x, q.y, q.z, q.w],
            angular_velocity: plate.angular_velocity,
            angular_acceleration: plate.angular_acceleration,
            hue: plate.hue,
            density: plate.density,
            mass: plate.mass,
            inv_inertia_tensor: std::array::from_fn(|i| inv[(i / 3, i % 3)]),
            center: plate.center,
            hot_spot: plate.hot_spot.clone(),
            fields: plate.fields.values().cloned().collect(),
            adjacent_fields: plate.adjacent_fields.values().cloned().collect(),
            subplate: SubplateRecord { id: plate.subplate.id, fields: plate.subplate.fields.values().cloned().collect() },
            drag_targets: plate
                .drag_targets
                .iter()
                .map(|(id, v)| DragTarget { field_id: *id, velocity: *v })
                .collect(),
        }
    }

    fn restore(self) -> Plate {
        let mut plate = Plate::new(self.id, self.density, self.hue);
        let [x, y, z, w] = self.quaternion;
        let q = Quaternion::new(w, x, y, z);
        // Stored unit quaternions are taken as-is.
        plate.quaternion = if (q.norm() - 1.0).abs() < 1e-9 {
            UnitQuaternion::new_unchecked(q)
        } else {
            UnitQuaternion::from_quaternion(q)
        };
        plate.angular_velocity = self.angular_velocity;
        plate.angular_acceleration = self.angular_acceleration;
        plate.mass = self.mass;
        plate.inv_inertia_local = Matrix3::from_row_slice(&self.inv_inertia_tensor);
        plate.inertia_local = plate.inv_inertia_local.try_inverse().unwrap_or_else(Matrix3::zeros);
        plate.center = self.center;
        plate.hot_spot = self.hot_spot;
        plate.fields = self.fields.into_iter().map(|f| (f.id, f)).collect();
        plate.adjacent_fields = self.adjacent_fields.into_iter().map(|f| (f.id, f)).collect();
        plate.subplate = Subplate {
            id: self.subplate.id,
            fields: self.subplate.fields.into_iter().map(|f| (f.id, f)).collect(),
        };
        plate.drag_targets = self.drag_targets.into_iter().map(|d| (d.field_id, d.velocity)).collect();
        plate.mark_clean();
        plate
    }
}

impl Model {
    pub fn to_record(&self) -> ModelRecord {
        ModelRecord {
            divisions: self.grid.divisions(),
            time: self.time,
            step_idx: self.step_idx,
            rng_state: RngState::capture(&self.rng),
            next_plate_id: self.next_plate_id,
            diverged: self.diverged,
            stall_time: self.stall_time,
            plates: self.plates.iter().map(PlateRecord::capture).collect(),
        }
    }

    /// Rebuild a model from a record on an existing grid.
    pub fn from_record(config: SimConfig, grid: Arc<GeodesicGrid>, record: ModelRecord) -> Result<Self> {
        record.validate(&grid)?;
        let mut model = Self::with_grid(config, grid)?;
        model.time = record.time;
        model.step_idx = record.step_idx;
        model.rng = record.rng_state.restore();
        let max_id = record.plates.iter().map(|p| p.id + 1).max().unwrap_or(0);
        model.next_plate_id = record.next_plate_id.max(max_id);
        model.diverged = record.diverged;
        model.stall_time = record.stall_time;
        model.plates = record.plates.into_iter().map(PlateRecord::restore).collect();
        model.plates.sort_by(|a, b| a.density.total_cmp(&b.density).then(a.id.cmp(&b.id)));
        info!(
            "restored snapshot at step {} ({} plates, {} fields)",
            model.step_idx,
            model.plates.len(),
            model.field_count()
        );
        Ok(model)
    }

    pub fn to_json(&self) -> Result<String> {
        self.to_record().to_json()
    }

    /// Restore from JSON, building a grid for `config`.
    pub fn from_json(config: SimConfig, json: &str) -> Result<Self> {
        let record = ModelRecord::from_json(json)?;
        if record.divisions != config.divisions {
            return Err(TectoError::SnapshotGridMismatch { expected: config.divisions, found: record.divisions });
        }
        let grid = Arc::new(GeodesicGrid::from_config(&config)?);
        Self::from_record(config, grid, record)
    }
}
