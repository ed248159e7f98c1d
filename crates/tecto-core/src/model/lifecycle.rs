//! Plate and field lifecycle: removal of dead fields and empty plates, growth
//! at divergent boundaries, division of oversized plates, density
//! normalisation and motion injection when the model stalls.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;

use super::{transfer_field, Model};
use crate::field::Field;
use crate::grid::FieldId;
use crate::plate::{HotSpot, Plate, PlateId};
use crate::processes::{event_scale, VolcanicEruption};
use crate::sphere::{great_circle_distance_rad, random_sphere_point, random_tangent};

/// Drop every field flagged dead, then every plate left without fields.
pub(crate) fn remove_dead_fields(model: &mut Model) {
    for plate in &mut model.plates {
        let dead: Vec<FieldId> = plate.fields.values().filter(|f| f.dead).map(|f| f.id).collect();
        for id in dead {
            plate.take_field(id);
        }
    }
    let before = model.plates.len();
    model.plates.retain(|p| {
        if p.is_empty() {
            info!("plate {} removed: no fields left", p.id);
        }
        !p.is_empty()
    });
    if model.plates.len() != before {
        normalize_densities(&mut model.plates);
    }
}

/// Recompute boundary flags and growth candidates of plates whose membership changed.
pub(crate) fn refresh_topology(model: &mut Model) {
    let grid = Arc::clone(&model.grid);
    for plate in model.plates.iter_mut().filter(|p| p.is_dirty()) {
        plate.update_boundaries(&grid);
        plate.update_adjacent_fields(&grid);
    }
}

/// Annex candidates that have travelled far enough without any plate above
/// or below them. New crust is stretched from the nearest owned continental
/// neighbour when possible, fresh ocean otherwise.
pub(crate) fn grow_plates(model: &mut Model, dt: f64) {
    let grid = Arc::clone(&model.grid);
    let Model { config, plates, rng, .. } = model;
    let threshold = config.new_field_distance * grid.field_diameter();
    let scale = event_scale(config.reference_field_count, grid.len());

    for pi in 0..plates.len() {
        let candidates: Vec<FieldId> = plates[pi].adjacent_fields.keys().copied().collect();
        let mut annex = Vec::new();
        for id in candidates {
            let position = plates[pi].absolute_position(&grid, id);
            let overlapped = plates
                .iter()
                .enumerate()
                .any(|(oi, other)| oi != pi && other.field_at(&grid, &position).is_some());
            let speed = plates[pi].linear_velocity(&position).norm();
            let plate = &mut plates[pi];
            let Some(candidate) = plate.adjacent_fields.get_mut(&id) else {
                continue;
            };
            if overlapped {
                candidate.no_collision_dist = 0.0;
                continue;
            }
            candidate.no_collision_dist += speed * dt;
            if candidate.no_collision_dist > threshold
                && plate.owned_neighbor_count(&grid, id) >= config.new_field_min_neighbors
            {
                annex.push((id, speed));
            }
        }

        let plate = &mut plates[pi];
        for (id, speed) in annex {
            let here = grid.position(id);
            let nearest = grid
                .neighbors(id)
                .iter()
                .copied()
                .filter(|nb| plate.fields.contains_key(nb))
                .min_by(|a, b| {
                    great_circle_distance_rad(grid.position(*a), here)
                        .total_cmp(&great_circle_distance_rad(grid.position(*b), here))
                        .then(a.cmp(b))
                });
            let Some(neighbor) = nearest.and_then(|nb| plate.fields.get_mut(&nb)) else {
                continue;
            };
            let mut field = if neighbor.crust.can_be_stretched() {
                let crust = neighbor.crust.stretch(config.continental_stretch_factor);
                let mut f = Field::new(id, crust);
                f.age = neighbor.age;
                f
            } else {
                Field::oceanic(id)
            };
            if field.is_oceanic() {
                field.volcanic_eruption = VolcanicEruption::maybe_spawn(speed, scale, config, dt, rng);
            }
            plate.insert_field(field);
        }
    }
}

/// Sort plates by density (ties by id) and renumber densities 0..n.
pub(crate) fn normalize_densities(plates: &mut [Plate]) {
    plates.sort_by(|a, b| a.density.total_cmp(&b.density).then(a.id.cmp(&b.id)));
    for (i, plate) in plates.iter_mut().enumerate() {
        plate.density = i as f64;
    }
}

// ── Division ─────────────────────────────────────────────────────────────────

pub(crate) fn divide_plates(model: &mut Model) {
    let limit = model.config.plate_division_threshold * model.grid.len() as f64;
    let oversized: Vec<PlateId> = model
        .plates
        .iter()
        .filter(|p| p.len() as f64 > limit && p.len() >= 2)
        .map(|p| p.id)
        .collect();
    if oversized.is_empty() {
        return;
    }
    for id in oversized {
        divide_plate(model, id);
    }
    normalize_densities(&mut model.plates);
}

/// Split half of a plate, grown breadth-first from a boundary field, into a
/// new plate with the same orientation and opposite angular velocity.
pub(crate) fn divide_plate(model: &mut Model, id: PlateId) -> Option<PlateId> {
    let grid = Arc::clone(&model.grid);
    let index = model.plate_index(id)?;
    let plate = &model.plates[index];
    let start = plate
        .fields
        .values()
        .find(|f| f.boundary)
        .map(|f| f.id)
        .or_else(|| plate.fields.keys().next().copied())?;

    let half = plate.len() / 2;
    let mut taken = Vec::with_capacity(half);
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(cur) = queue.pop_front() {
        if taken.len() >= half {
            break;
        }
        taken.push(cur);
        for nb in grid.neighbors(cur) {
            if plate.fields.contains_key(nb) && seen.insert(*nb) {
                queue.push_back(*nb);
            }
        }
    }
    if taken.is_empty() {
        return None;
    }

    let new_id = model.next_plate_id;
    model.next_plate_id += 1;
    let mut split = Plate::new(new_id, plate.density, model.rng.gen());
    split.quaternion = plate.quaternion;
    split.angular_velocity = -plate.angular_velocity;
    let original_size = plate.len();

    model.plates.push(split);
    let new_index = model.plates.len() - 1;
    for fid in &taken {
        transfer_field(&mut model.plates, index, new_index, *fid);
    }
    for i in [index, new_index] {
        let p = &mut model.plates[i];
        p.update_boundaries(&grid);
        p.update_adjacent_fields(&grid);
        p.update_inertia(&grid, &model.config);
        p.update_center(&grid, &model.config);
    }
    info!(
        "plate {id} ({original_size} fields) divided: {} fields moved to new plate {new_id}",
        taken.len()
    );
    Some(new_id)
}

// ── Stall handling ───────────────────────────────────────────────────────────

/// Inject fresh motion once relative plate motion has stayed near zero for
/// long enough.
pub(crate) fn handle_stall(model: &mut Model, dt: f64) {
    if model.plates.is_empty() {
        model.stall_time = 0.0;
        return;
    }
    if max_relative_speed(&model.plates) < model.config.stall_speed_threshold {
        model.stall_time += dt;
    } else {
        model.stall_time = 0.0;
    }
    if model.stall_time >= model.config.stall_duration {
        inject_motion(model);
        model.stall_time = 0.0;
    }
}

/// Largest |ωᵢ − ωⱼ| over plate pairs; a lone plate is compared with rest.
fn max_relative_speed(plates: &[Plate]) -> f64 {
    if plates.len() == 1 {
        return plates[0].angular_velocity.norm();
    }
    let mut max = 0.0f64;
    for (i, a) in plates.iter().enumerate() {
        for b in &plates[i + 1..] {
            max = max.max((a.angular_velocity - b.angular_velocity).norm());
        }
    }
    max
}

fn inject_motion(model: &mut Model) {
    let Model { config, plates, rng, .. } = model;
    for plate in plates.iter_mut() {
        let position = random_sphere_point(rng);
        let force = random_tangent(&position, rng) * config.injected_force;
        plate.hot_spot = HotSpot { position, force };
    }
    let mut order: Vec<usize> = (0..plates.len()).collect();
    order.shuffle(rng);
    for (rank, i) in order.into_iter().enumerate() {
        plates[i].density = rank as f64;
    }
    normalize_densities(plates);
    info!("motion stalled: injected new hotspots into {} plates", plates.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimConfig, SpatialIndexMode};
    use crate::model::fill_plate;
    use crate::sphere::Vec3;

    fn model() -> Model {
        Model::new(SimConfig { divisions: 6, spatial_index: SpatialIndexMode::Exact, ..SimConfig::default() }).unwrap()
    }

    #[test]
    fn dead_fields_and_empty_plates_are_removed() {
        let mut m = model();
        let a = m.add_plate(0.0);
        let b = m.add_plate(0.5);
        fill_plate(m.plate_mut(a).unwrap(), 0..10, false);
        fill_plate(m.plate_mut(b).unwrap(), [20], false);
        m.plate_mut(a).unwrap().fields.get_mut(&3).unwrap().dead = true;
        m.plate_mut(b).unwrap().fields.get_mut(&20).unwrap().dead = true;

        remove_dead_fields(&mut m);
        assert_eq!(m.plates().len(), 1);
        assert_eq!(m.plate(a).unwrap().len(), 9);
        assert!(!m.plate(a).unwrap().fields.contains_key(&3));
        assert_eq!(m.plate(a).unwrap().density, 0.0);
    }

    #[test]
    fn moving_plate_grows_into_free_space() {
        let mut m = model();
        let a = m.add_plate(0.0);
        let cap: Vec<FieldId> = m.grid().fields().iter().filter(|f| f.position.z > 0.5).map(|f| f.id).collect();
        fill_plate(m.plate_mut(a).unwrap(), cap, false);
        m.refresh_plates();
        m.plate_mut(a).unwrap().angular_velocity = Vec3::new(0.02, 0.0, 0.0);
        let before = m.plate(a).unwrap().len();

        for _ in 0..200 {
            grow_plates(&mut m, 0.1);
            refresh_topology(&mut m);
        }
        let after = m.plate(a).unwrap();
        assert!(after.len() > before);
        assert!(after.fields.values().all(|f| f.is_oceanic()));
    }

    #[test]
    fn overlapped_candidates_do_not_grow() {
        let mut m = model();
        let a = m.add_plate(0.0);
        let b = m.add_plate(0.5);
        let n = m.grid().len() as FieldId;
        let north: Vec<FieldId> = (0..n).filter(|id| m.grid().position(*id).z > 0.0).collect();
        fill_plate(m.plate_mut(a).unwrap(), north, false);
        fill_plate(m.plate_mut(b).unwrap(), 0..n, false);
        m.refresh_plates();
        m.plate_mut(a).unwrap().angular_velocity = Vec3::new(0.02, 0.0, 0.0);
        let before = m.plate(a).unwrap().len();
        for _ in 0..50 {
            grow_plates(&mut m, 0.1);
        }
        assert_eq!(m.plate(a).unwrap().len(), before);
        assert!(m.plate(a).unwrap().adjacent_fields.values().all(|f| f.no_collision_dist == 0.0));
    }

    #[test]
    fn continental_edge_stretches() {
        let mut m = model();
        let a = m.add_plate(0.0);
        let cap: Vec<FieldId> = m.grid().fields().iter().filter(|f| f.position.z > 0.5).map(|f| f.id).collect();
        fill_plate(m.plate_mut(a).unwrap(), cap, true);
        m.refresh_plates();
        m.plate_mut(a).unwrap().angular_velocity = Vec3::new(0.02, 0.0, 0.0);
        let before = m.plate(a).unwrap().len();
        for _ in 0..200 {
            grow_plates(&mut m, 0.1);
            refresh_topology(&mut m);
        }
        let plate = m.plate(a).unwrap();
        assert!(plate.len() > before);
        assert!(plate.fields.values().any(|f| f.is_continental() && f.crust.thickness() < 40.0));
    }

    #[test]
    fn division_partitions_fields() {
        let mut m = model();
        let a = m.add_plate(0.0);
        let n = m.grid().len() as FieldId;
        fill_plate(m.plate_mut(a).unwrap(), 0..n, false);
        m.refresh_plates();
        m.plate_mut(a).unwrap().angular_velocity = Vec3::new(0.0, 0.01, 0.0);

        divide_plates(&mut m);
        assert_eq!(m.plates().len(), 2);
        let b = m.plates().iter().map(|p| p.id).find(|id| *id != a).unwrap();
        let pa = m.plate(a).unwrap();
        let pb = m.plate(b).unwrap();
        assert_eq!(pa.len() + pb.len(), n as usize);
        assert!(pa.fields.keys().all(|id| !pb.fields.contains_key(id)));
        assert_eq!(pb.len(), n as usize / 2);
        assert_eq!(pb.angular_velocity, -pa.angular_velocity);
        let mut densities: Vec<f64> = m.plates().iter().map(|p| p.density).collect();
        densities.sort_by(f64::total_cmp);
        assert_eq!(densities, vec![0.0, 1.0]);
    }

    #[test]
    fn stall_injects_hotspots() {
        let mut m = model();
        let a = m.add_plate(0.0);
        let b = m.add_plate(0.0);
        fill_plate(m.plate_mut(a).unwrap(), 0..10, false);
        fill_plate(m.plate_mut(b).unwrap(), 10..20, false);
        m.refresh_plates();
        let steps = (m.config().stall_duration / 0.1).ceil() as usize + 1;
        for _ in 0..steps {
            handle_stall(&mut m, 0.1);
        }
        for plate in m.plates() {
            assert!(plate.hot_spot.force.norm() > 0.0);
            assert!(plate.hot_spot.force.dot(&plate.hot_spot.position).abs() < 1e-9);
        }
        assert!(m.stall_time < m.config().stall_duration);
    }
}
