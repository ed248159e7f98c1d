//! Collision detection between plates and the per-pair resolution rules.
//!
//! Plates are sorted by density. For each candidate field the search walks
//! outward from the owning plate, alternating the next denser and the next
//! lighter plate, and stops at the first plate with a field at the same world
//! position. Each field takes part in at most one contact per step.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::debug;

use super::{pair_mut, Model};
use crate::field::Field;
use crate::grid::{FieldId, GeodesicGrid};
use crate::plate::{Plate, PlateId};
use crate::processes::{Orogeny, Subduction, VolcanicActivity};
use crate::sphere::{great_circle_distance_rad, Vec3};

/// Two overlapping fields. `bottom` is the denser plate's index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Contact {
    pub bottom: usize,
    pub bottom_field: FieldId,
    pub top: usize,
    pub top_field: FieldId,
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    /// Both sides are ocean next to a continent: clear the gap.
    ClearGap,
    Subduct { drag: bool },
    Orogeny,
    DragOnly,
}

/// Island field queued to move onto the continent it hit.
struct Absorption {
    from: usize,
    field: FieldId,
    into: usize,
    position: Vec3,
}

pub(crate) fn detect_and_resolve(model: &mut Model, dt: f64) {
    let grid = Arc::clone(&model.grid);
    let contacts = detect(&model.plates, &grid, model.config.optimized_collisions);
    if !contacts.is_empty() {
        debug!("{} contacts", contacts.len());
    }
    let mut absorptions = Vec::new();
    for contact in &contacts {
        if let Some(a) = resolve(model, &grid, contact, dt) {
            absorptions.push(a);
        }
    }
    for a in absorptions {
        absorb_island(&mut model.plates, &grid, a);
    }
}

/// Plate indices in search order: +1, -1, +2, -2, ...
fn walk_order(index: usize, count: usize) -> impl Iterator<Item = usize> {
    (1..count).flat_map(move |step| {
        let denser = (index + step < count).then_some(index + step);
        let lighter = index.checked_sub(step);
        denser.into_iter().chain(lighter)
    })
}

pub(crate) fn detect(plates: &[Plate], grid: &GeodesicGrid, optimized: bool) -> Vec<Contact> {
    let mut claimed: BTreeSet<(usize, FieldId)> = BTreeSet::new();
    let mut contacts = Vec::new();
    for (pi, plate) in plates.iter().enumerate() {
        for (fid, field) in &plate.fields {
            if optimized && !field.boundary && !field.needs_collision_scan() {
                continue;
            }
            if claimed.contains(&(pi, *fid)) {
                continue;
            }
            let position = plate.absolute_position(grid, *fid);
            for other in walk_order(pi, plates.len()) {
                let Some(ofid) = plates[other].field_at(grid, &position) else {
                    continue;
                };
                if claimed.insert((other, ofid)) {
                    claimed.insert((pi, *fid));
                    let (bottom, bottom_field, top, top_field) =
                        if other > pi { (other, ofid, pi, *fid) } else { (pi, *fid, other, ofid) };
                    contacts.push(Contact { bottom, bottom_field, top, top_field, position });
                }
                break;
            }
        }
    }
    contacts
}

fn resolve(model: &mut Model, grid: &GeodesicGrid, c: &Contact, dt: f64) -> Option<Absorption> {
    let config = &model.config;
    let island_max = config.island_max_size;

    let bottom = &model.plates[c.bottom];
    let top = &model.plates[c.top];
    let (Some(bf), Some(tf)) = (bottom.fields.get(&c.bottom_field), top.fields.get(&c.top_field)) else {
        return None;
    };

    let v_bottom = bottom.linear_velocity(&c.position);
    let v_top = top.linear_velocity(&c.position);
    let rel_velocity = v_bottom - v_top;
    let bottom_buffer = bottom.is_continent_buffer(grid, c.bottom_field);
    let top_buffer = top.is_continent_buffer(grid, c.top_field);

    let rule = if bottom_buffer && top_buffer {
        Rule::ClearGap
    } else if bf.crust.can_subduct() {
        Rule::Subduct { drag: bottom_buffer && tf.is_oceanic() }
    } else if !tf.crust.can_subduct() {
        Rule::Orogeny
    } else {
        Rule::DragOnly
    };

    let mut absorption = None;
    if rule == Rule::Orogeny {
        let top_island = top.is_island(grid, c.top_field, island_max);
        let bottom_island = bottom.is_island(grid, c.bottom_field, island_max);
        if top_island && !bottom_island {
            absorption = Some(Absorption { from: c.top, field: c.top_field, into: c.bottom, position: c.position });
        } else if bottom_island && !top_island {
            absorption = Some(Absorption { from: c.bottom, field: c.bottom_field, into: c.top, position: c.position });
        }
    }

    let max_dist = config.max_subduction_dist;
    let speed = rel_velocity.norm();

    let (bottom, top) = pair_mut(&mut model.plates, c.bottom, c.top);
    let ids = (bottom.id, top.id);
    let (Some(bf), Some(tf)) = (bottom.fields.get_mut(&c.bottom_field), top.fields.get_mut(&c.top_field)) else {
        return None;
    };
    bf.colliding = true;
    tf.colliding = true;
    let targets = (&mut bottom.drag_targets, &mut top.drag_targets);

    match rule {
        Rule::ClearGap => {
            tf.dead = true;
        }
        Rule::Subduct { drag } => {
            match bf.subduction.as_mut() {
                Some(s) => s.collide(ids.1, c.top_field, rel_velocity),
                None => bf.subduction = Some(Subduction::new(ids.1, c.top_field, rel_velocity)),
            }
            let progress = bf.subduction.as_ref().map(|s| s.progress(max_dist)).unwrap_or(0.0);
            tf.volcanic_act.get_or_insert_with(VolcanicActivity::default);
            tf.volcanic_feed = Some(tf.volcanic_feed.map_or(progress, |p| p.max(progress)));
            if drag {
                apply_drag(bf, tf, targets, c, ids, (v_bottom, v_top));
            }
        }
        Rule::Orogeny => {
            for f in [&mut *bf, &mut *tf] {
                if f.orogeny.is_none() {
                    f.orogeny = Some(Orogeny::new(&f.crust));
                }
                if let Some(o) = f.orogeny.as_mut() {
                    o.collide(speed, config, dt);
                }
            }
            apply_drag(bf, tf, targets, c, ids, (v_bottom, v_top));
        }
        Rule::DragOnly => apply_drag(bf, tf, targets, c, ids, (v_bottom, v_top)),
    }
    absorption
}

/// Pull each field toward the other plate's surface velocity.
fn apply_drag(
    bf: &mut Field,
    tf: &mut Field,
    targets: (&mut BTreeMap<FieldId, Vec3>, &mut BTreeMap<FieldId, Vec3>),
    c: &Contact,
    (bottom_id, top_id): (PlateId, PlateId),
    (v_bottom, v_top): (Vec3, Vec3),
) {
    bf.dragging_plate = Some(top_id);
    tf.dragging_plate = Some(bottom_id);
    targets.0.insert(c.bottom_field, v_top);
    targets.1.insert(c.top_field, v_bottom);
}

/// Move an island field onto the free grid slot of the receiving plate that
/// is closest to the collision point. The original field is marked dead.
fn absorb_island(plates: &mut [Plate], grid: &GeodesicGrid, a: Absorption) {
    let into = &plates[a.into];
    let local = into.local_position(&a.position);
    let anchor = grid.nearest(&local);
    let slot = grid
        .neighbors(anchor)
        .iter()
        .chain(std::iter::once(&anchor))
        .filter(|id| !into.fields.contains_key(id))
        .min_by(|x, y| {
            great_circle_distance_rad(grid.position(**x), &local)
                .total_cmp(&great_circle_distance_rad(grid.position(**y), &local))
                .then(x.cmp(y))
        })
        .copied();
    let Some(slot) = slot else {
        return;
    };

    let (src, dst) = pair_mut(plates, a.from, a.into);
    let Some(original) = src.fields.get_mut(&a.field) else {
        return;
    };
    if original.dead {
        return;
    }
    let moved = original.relocated(slot);
    original.dead = true;
    dst.insert_field(moved);
    debug!("island field {} absorbed into plate {} at {}", a.field, dst.id, slot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimConfig, SpatialIndexMode};
    use crate::model::fill_plate;

    /// Two caps around the north pole, resolved with a full scan.
    fn model_with_two_caps(bottom_continental: bool, top_continental: bool) -> Model {
        let config = SimConfig {
            divisions: 6,
            spatial_index: SpatialIndexMode::Exact,
            optimized_collisions: false,
            ..SimConfig::default()
        };
        let mut m = Model::new(config).unwrap();
        let top = m.add_plate(0.0);
        let bottom = m.add_plate(0.5);
        let north: Vec<FieldId> = m.grid().fields().iter().filter(|f| f.position.z > 0.3).map(|f| f.id).collect();
        let overlap: Vec<FieldId> = m.grid().fields().iter().filter(|f| f.position.z > 0.7).map(|f| f.id).collect();
        fill_plate(m.plate_mut(top).unwrap(), north, top_continental);
        fill_plate(m.plate_mut(bottom).unwrap(), overlap, bottom_continental);
        m.refresh_plates();
        m
    }

    #[test]
    fn walk_alternates_outward() {
        let order: Vec<usize> = walk_order(2, 5).collect();
        assert_eq!(order, vec![3, 1, 4, 0]);
        let order: Vec<usize> = walk_order(0, 3).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn each_field_collides_once() {
        let m = model_with_two_caps(false, false);
        let contacts = detect(&m.plates, m.grid(), false);
        assert!(!contacts.is_empty());
        let mut seen = BTreeSet::new();
        for c in &contacts {
            assert_eq!(c.bottom, 1);
            assert_eq!(c.top, 0);
            assert!(seen.insert((c.bottom, c.bottom_field)));
            assert!(seen.insert((c.top, c.top_field)));
        }
        assert_eq!(contacts.len(), m.plates[1].len());
    }

    #[test]
    fn oceanic_bottom_subducts_under_top() {
        let mut m = model_with_two_caps(false, true);
        detect_and_resolve(&mut m, 0.1);
        let bottom = &m.plates[1];
        assert!(bottom.fields.values().all(|f| f.subduction.is_some() && f.colliding));
        let top = &m.plates[0];
        assert!(top.fields.values().any(|f| f.volcanic_act.is_some()));
    }

    #[test]
    fn continents_fold_and_drag() {
        let mut m = model_with_two_caps(true, true);
        m.plates[1].angular_velocity = Vec3::new(0.0, 0.01, 0.0);
        detect_and_resolve(&mut m, 0.1);
        let bottom = &m.plates[1];
        assert!(bottom.fields.values().all(|f| f.orogeny.is_some() && f.dragging_plate.is_some()));
        assert_eq!(bottom.drag_targets.len(), bottom.len());
        assert!(m.plates[0].fields.values().any(|f| f.orogeny.as_ref().is_some_and(|o| o.stress > 0.0)));
    }

    #[test]
    fn continent_under_ocean_only_drags() {
        let mut m = model_with_two_caps(true, false);
        detect_and_resolve(&mut m, 0.1);
        let bottom = &m.plates[1];
        assert!(bottom.fields.values().all(|f| f.subduction.is_none() && f.orogeny.is_none()));
        assert!(bottom.fields.values().all(|f| f.dragging_plate.is_some()));
    }

    #[test]
    fn optimized_scan_revisits_last_step_contacts() {
        let mut m = model_with_two_caps(true, true);
        assert!(m.plates[1].fields.values().any(|f| !f.boundary));
        detect_and_resolve(&mut m, 0.1);
        for plate in &mut m.plates {
            for field in plate.fields.values_mut() {
                field.reset_transient();
            }
        }
        let full = detect(&m.plates, m.grid(), false);
        let optimized = detect(&m.plates, m.grid(), true);
        assert_eq!(full.len(), m.plates[1].len());
        assert_eq!(optimized.len(), full.len());
    }

    #[test]
    fn optimized_scan_skips_quiet_interior() {
        let m = model_with_two_caps(true, true);
        let full = detect(&m.plates, m.grid(), false);
        let optimized = detect(&m.plates, m.grid(), true);
        assert!(optimized.len() < full.len());
    }

    #[test]
    fn island_is_absorbed_into_free_slot() {
        let config = SimConfig {
            divisions: 6,
            spatial_index: SpatialIndexMode::Exact,
            optimized_collisions: false,
            ..SimConfig::default()
        };
        let mut m = Model::new(config).unwrap();
        let top = m.add_plate(0.0);
        let bottom = m.add_plate(0.5);
        let ring: Vec<FieldId> = m.grid().neighbors(0).to_vec();
        let hole = ring[0];
        let land: Vec<FieldId> = m
            .grid()
            .fields()
            .iter()
            .filter(|f| f.position.z > 0.3 && f.id != hole)
            .map(|f| f.id)
            .collect();
        fill_plate(m.plate_mut(top).unwrap(), land, true);
        fill_plate(m.plate_mut(bottom).unwrap(), [0], true);
        fill_plate(m.plate_mut(bottom).unwrap(), ring, false);
        m.refresh_plates();

        detect_and_resolve(&mut m, 0.1);
        let top_plate = m.plate(top).unwrap();
        assert!(top_plate.fields.get(&hole).is_some_and(|f| f.is_continental()));
        assert!(m.plate(bottom).unwrap().fields[&0].dead);
    }
}
