//! Read-only views of the model for the rendering side: periodic per-plate
//! summaries in compact typed arrays, single-field queries and great-circle
//! cross sections.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::Model;
use crate::config::SimConfig;
use crate::crust::RockLayer;
use crate::field::Field;
use crate::grid::{FieldId, GeodesicGrid};
use crate::plate::{Plate, PlateId};
use crate::processes::Earthquake;
use crate::sphere::{great_circle_arc_points, great_circle_distance_rad, Vec3, PLANET_RADIUS_KM};

/// Sample spacing used when a cross section is requested without one.
pub const DEFAULT_CROSS_SECTION_STEP_KM: f64 = 50.0;

/// Optional per-field channels included in [`PlateOutput`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputChannels {
    pub boundary: bool,
    pub earthquakes: bool,
    pub eruptions: bool,
    pub forces: bool,
    pub rock_types: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateOutput {
    pub id: PlateId,
    pub hue: f64,
    pub density: f64,
    /// `[x, y, z, w]`.
    pub quaternion: [f64; 4],
    pub angular_velocity: Vec3,
    /// World-frame label anchor.
    pub center: Option<Vec3>,
    pub field_ids: Vec<FieldId>,
    pub elevation: Vec<f32>,
    pub normalized_age: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earthquake_magnitude: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earthquake_depth: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volcanic_eruption: Option<Vec<u8>>,
    /// Flattened `x, y, z` per field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<Vec<f32>>,
    /// Stacking index of the top rock, `u8::MAX` for bare fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rock_type: Option<Vec<u8>>,
    pub subplate_field_ids: Vec<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOutput {
    pub step_idx: u64,
    pub time: f64,
    pub diverged: bool,
    pub plates: Vec<PlateOutput>,
}

/// Everything known about one field, for point queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub plate_id: PlateId,
    pub field_id: FieldId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub age: f64,
    pub normalized_age: f64,
    pub elevation: f64,
    pub thickness: f64,
    pub continental: bool,
    pub island: bool,
    pub boundary: bool,
    pub marked: bool,
    pub layers: Vec<RockLayer>,
    pub subduction_progress: Option<f64>,
    pub orogeny_stress: Option<f64>,
    pub volcanic_activity: Option<f64>,
    pub earthquake: Option<Earthquake>,
    pub volcanic_eruption: bool,
}

impl FieldInfo {
    pub fn new(config: &SimConfig, grid: &GeodesicGrid, plate: &Plate, field: &Field) -> Self {
        let position = plate.absolute_position(grid, field.id);
        Self {
            plate_id: plate.id,
            field_id: field.id,
            position,
            velocity: plate.linear_velocity(&position),
            age: field.age,
            normalized_age: field.normalized_age(config),
            elevation: field.elevation(config),
            thickness: field.crust.thickness(),
            continental: field.is_continental(),
            island: plate.is_island(grid, field.id, config.island_max_size),
            boundary: field.boundary,
            marked: field.marked,
            layers: field.crust.layers().to_vec(),
            subduction_progress: field.subduction_progress(config),
            orogeny_stress: field.orogeny.as_ref().map(|o| o.stress),
            volcanic_activity: field.volcanic_act.as_ref().map(|v| v.value),
            earthquake: field.earthquake.clone(),
            volcanic_eruption: field.volcanic_eruption.is_some(),
        }
    }
}

fn byte_channel(on: bool, fields: &[&Field], f: impl Fn(&Field) -> u8) -> Option<Vec<u8>> {
    on.then(|| fields.iter().copied().map(f).collect())
}

// ── Cross sections ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSectionPoint {
    /// Distance from the start of the arc.
    pub dist_km: f64,
    pub field_id: FieldId,
    pub elevation: f64,
    pub layers: Vec<RockLayer>,
    pub subduction_progress: Option<f64>,
    pub island: bool,
}

/// A run of consecutive samples that hit the same plate (or its subplate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSectionSegment {
    pub plate_id: PlateId,
    pub subplate: bool,
    pub points: Vec<CrossSectionPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSection {
    pub length_km: f64,
    pub segments: Vec<CrossSectionSegment>,
}

impl Model {
    /// Per-plate summary; plates in `hidden` are left out.
    pub fn output(&self, channels: &OutputChannels, hidden: &BTreeSet<PlateId>) -> ModelOutput {
        let plates = self
            .plates
            .iter()
            .filter(|p| !hidden.contains(&p.id))
            .map(|p| self.plate_output(p, channels))
            .collect();
        ModelOutput { step_idx: self.step_idx, time: self.time, diverged: self.diverged, plates }
    }

    fn plate_output(&self, plate: &Plate, channels: &OutputChannels) -> PlateOutput {
        let config = &self.config;
        let fields: Vec<&Field> = plate.fields.values().collect();
        let q = plate.quaternion.coords;

        PlateOutput {
            id: plate.id,
            hue: plate.hue,
            density: plate.density,
            quaternion: [q.x, q.y, q.z, q.w],
            angular_velocity: plate.angular_velocity,
            center: plate.center.map(|c| plate.quaternion * c),
            field_ids: plate.fields.keys().copied().collect(),
            elevation: fields.iter().map(|f| f.elevation(config) as f32).collect(),
            normalized_age: fields.iter().map(|f| f.normalized_age(config) as f32).collect(),
            boundary: byte_channel(channels.boundary, &fields, |f| u8::from(f.boundary)),
            earthquake_magnitude: channels
                .earthquakes
                .then(|| fields.iter().map(|f| f.earthquake.as_ref().map_or(0.0, |e| e.magnitude as f32)).collect()),
            earthquake_depth: channels
                .earthquakes
                .then(|| fields.iter().map(|f| f.earthquake.as_ref().map_or(0.0, |e| e.depth as f32)).collect()),
            volcanic_eruption: byte_channel(channels.eruptions, &fields, |f| u8::from(f.volcanic_eruption.is_some())),
            force: channels.forces.then(|| {
                fields
                    .iter()
                    .flat_map(|f| {
                        let v = plate.field_force(&self.grid, config, f.id);
                        [v.x as f32, v.y as f32, v.z as f32]
                    })
                    .collect()
            }),
            rock_type: byte_channel(channels.rock_types, &fields, |f| {
                f.crust.top_rock().map_or(u8::MAX, |r| r.stacking_index())
            }),
            subplate_field_ids: plate.subplate.fields.keys().copied().collect(),
        }
    }

    /// Slice the planet along the great-circle arc from `from` to `to`,
    /// sampling every `step_km` (non-positive values use the default).
    pub fn cross_section(&self, from: &Vec3, to: &Vec3, step_km: f64) -> CrossSection {
        let step_km = if step_km > 0.0 { step_km } else { DEFAULT_CROSS_SECTION_STEP_KM };
        let a = from.normalize();
        let b = to.normalize();
        let length_km = great_circle_distance_rad(&a, &b) * PLANET_RADIUS_KM;
        let samples = (length_km / step_km).ceil() as usize + 1;
        let points = great_circle_arc_points(&a, &b, samples.max(2));
        let last = (points.len() - 1) as f64;

        let mut segments: Vec<CrossSectionSegment> = Vec::new();
        // (plate, subplate) -> (segment index, last sample index)
        let mut open: BTreeMap<(PlateId, bool), (usize, usize)> = BTreeMap::new();
        for (i, p) in points.iter().enumerate() {
            let dist_km = length_km * i as f64 / last;
            for plate in &self.plates {
                let hits = [
                    (false, plate.field_at(&self.grid, p).and_then(|id| plate.fields.get(&id))),
                    (true, plate.subplate_field_at(&self.grid, p).and_then(|id| plate.subplate.fields.get(&id))),
                ];
                for (subplate, field) in hits {
                    let Some(field) = field else {
                        continue;
                    };
                    let point = CrossSectionPoint {
                        dist_km,
                        field_id: field.id,
                        elevation: field.elevation(&self.config),
                        layers: field.crust.layers().to_vec(),
                        subduction_progress: field.subduction_progress(&self.config),
                        island: !subplate && plate.is_island(&self.grid, field.id, self.config.island_max_size),
                    };
                    let key = (plate.id, subplate);
                    match open.get_mut(&key) {
                        Some((segment, last_i)) if *last_i + 1 == i => {
                            segments[*segment].points.push(point);
                            *last_i = i;
                        }
                        _ => {
                            segments.push(CrossSectionSegment { plate_id: plate.id, subplate, points: vec![point] });
                            open.insert(key, (segments.len() - 1, i));
                        }
                    }
                }
            }
        }
        CrossSection { length_km, segments }
    }
}
