//! Geological process updates, run once per step after collision resolution.
//!
//! Subplates sink first, then slabs advance (scraping sediment onto the
//! overriding plate and possibly tearing off into its subplate). After that
//! every owned field ages and updates its orogeny, volcanism and events, and
//! finally sediment spreads across the ocean floor and high ground erodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use rand_chacha::ChaCha8Rng;

use super::{pair_mut, Model};
use crate::config::SimConfig;
use crate::crust::{Rock, RockLayer, SEA_LEVEL};
use crate::grid::{FieldId, GeodesicGrid};
use crate::plate::{Plate, PlateId};
use crate::processes::subduction::slab_gradient;
use crate::processes::{event_scale, Earthquake, Orogeny, Subduction, SubductionState, VolcanicActivity, VolcanicEruption};
use crate::sphere::Vec3;

/// Fraction of the sediment difference evened out per unit time.
const SEDIMENT_SPREAD_RATE: f64 = 0.5;

/// Oceanic sediment stops accumulating at this thickness (km).
const MAX_OCEANIC_SEDIMENT_KM: f64 = 3.0;

/// Sediment scraped off a slab, waiting to be added to the overriding field.
struct Accretion {
    plate: PlateId,
    field: FieldId,
    layers: Vec<RockLayer>,
}

pub(crate) fn update_fields(model: &mut Model, dt: f64) {
    let grid = Arc::clone(&model.grid);
    let Model { config, plates, rng, .. } = model;
    let config: &SimConfig = config;
    let scale = event_scale(config.reference_field_count, grid.len());

    for plate in plates.iter_mut() {
        sink_subplate(plate, config, dt);
    }

    let mut accretions = Vec::new();
    let mut detachments = Vec::new();
    for plate in plates.iter_mut() {
        advance_slabs(plate, &grid, config, scale, dt, rng, &mut accretions);
        let from = plate.id;
        detachments.extend(find_detachments(plate, &grid, config).into_iter().map(|(field, top)| (from, field, top)));
    }
    for a in accretions {
        accrete(plates, a);
    }
    for (from, field, top) in detachments {
        detach(plates, &grid, from, field, top);
    }

    for plate in plates.iter_mut() {
        propagate_orogeny(plate, &grid, config);
        update_surface(plate, &grid, config, scale, dt, rng);
        if config.sediments {
            deposit_sediment(plate, &grid, config, dt);
        }
        if config.erosion {
            erode(plate, &grid, config, dt);
        }
    }
}

// ── Subduction ───────────────────────────────────────────────────────────────

/// Sink detached slabs and keep the host fields above them volcanically fed.
fn sink_subplate(plate: &mut Plate, config: &SimConfig, dt: f64) {
    let max = config.max_subduction_dist;
    let mut sunk = Vec::new();
    for (id, field) in plate.subplate.fields.iter_mut() {
        let slab = field.subduction.get_or_insert_with(|| Subduction {
            dist: 0.0,
            top_plate: None,
            top_field: None,
            rel_velocity: Vec3::zeros(),
        });
        slab.dist += config.subplate_sinking_speed * dt;
        if slab.dist >= max {
            sunk.push(*id);
            continue;
        }
        let progress = slab.progress(max);
        if let Some(host) = plate.fields.get_mut(id) {
            host.volcanic_act.get_or_insert_with(VolcanicActivity::default);
            host.volcanic_feed = Some(host.volcanic_feed.map_or(progress, |p| p.max(progress)));
        }
    }
    for id in sunk {
        plate.subplate.fields.remove(&id);
    }
}

fn advance_slabs(
    plate: &mut Plate,
    grid: &GeodesicGrid,
    config: &SimConfig,
    scale: f64,
    dt: f64,
    rng: &mut ChaCha8Rng,
    accretions: &mut Vec<Accretion>,
) {
    let dists: BTreeMap<FieldId, f64> = plate
        .fields
        .iter()
        .filter_map(|(id, f)| f.subduction.as_ref().map(|s| (*id, s.dist)))
        .collect();
    let diameter = grid.field_diameter();
    let max = config.max_subduction_dist;

    for id in dists.keys() {
        // Shallowest owned neighbour; non-subducting neighbours count as zero.
        let cap = grid
            .neighbors(*id)
            .iter()
            .filter(|nb| plate.fields.contains_key(nb))
            .map(|nb| dists.get(nb).copied().unwrap_or(0.0))
            .fold(f64::INFINITY, f64::min)
            + diameter;

        let Some(field) = plate.fields.get_mut(id) else {
            continue;
        };
        let colliding = field.colliding;
        let Some(slab) = field.subduction.as_mut() else {
            continue;
        };
        let state = slab.update(colliding, cap, config, dt);
        let top = slab.top_plate.zip(slab.top_field);
        let rel_speed = slab.rel_velocity.norm();
        let progress = slab.progress(max);

        match state {
            SubductionState::Consumed => field.dead = true,
            SubductionState::Reverted => field.subduction = None,
            SubductionState::Active { progress_delta } => {
                if progress_delta > 0.0 {
                    let layers = field.crust.subduct(progress_delta);
                    if let Some((top_plate, top_field)) = top.filter(|_| !layers.is_empty()) {
                        accretions.push(Accretion { plate: top_plate, field: top_field, layers });
                    }
                }
                if colliding && field.earthquake.is_none() {
                    field.earthquake = Earthquake::maybe_spawn(rel_speed, progress, scale, config, dt, rng);
                }
            }
        }
    }
}

fn accrete(plates: &mut [Plate], a: Accretion) {
    let target = plates
        .iter_mut()
        .find(|p| p.id == a.plate)
        .and_then(|p| p.fields.get_mut(&a.field));
    if let Some(field) = target {
        field.crust.accrete(&a.layers);
    }
}

/// Slabs whose motion turned against the local slab gradient, with the plate
/// they should tear off into.
fn find_detachments(plate: &Plate, grid: &GeodesicGrid, config: &SimConfig) -> Vec<(FieldId, PlateId)> {
    let max = config.max_subduction_dist;
    let mut out = Vec::new();
    for (id, field) in &plate.fields {
        let Some(slab) = field.subduction.as_ref() else {
            continue;
        };
        let Some(top) = slab.top_plate else {
            continue;
        };
        let progress = slab.progress(max);
        if field.dead || progress <= config.detach_progress {
            continue;
        }
        let neighbors: Vec<(Vec3, f64)> = grid
            .neighbors(*id)
            .iter()
            .filter_map(|nb| {
                let p = plate.fields.get(nb)?.subduction_progress(config)?;
                Some((plate.absolute_position(grid, *nb), p))
            })
            .collect();
        let position = plate.absolute_position(grid, *id);
        let (gradient, qualifying) = slab_gradient(&position, progress, &neighbors);
        if slab.should_detach(&gradient, qualifying, config) {
            out.push((*id, top));
        }
    }
    out
}

/// Move a slab from its plate into the overriding plate's subplate, at the
/// grid slot under its current world position.
fn detach(plates: &mut [Plate], grid: &GeodesicGrid, from: PlateId, field: FieldId, top: PlateId) {
    let a = plates.iter().position(|p| p.id == from);
    let b = plates.iter().position(|p| p.id == top);
    let (Some(a), Some(b)) = (a, b) else {
        return;
    };
    if a == b {
        return;
    }
    let (src, dst) = pair_mut(plates, a, b);
    let position = src.absolute_position(grid, field);
    let slot = dst.grid_id_at(grid, &position);
    if dst.subplate.fields.contains_key(&slot) {
        return;
    }
    let Some(slab) = src.take_field(field) else {
        return;
    };
    dst.subplate.fields.insert(slot, slab.relocated(slot));
    debug!("field {field} of plate {from} detached into subplate of plate {top} at {slot}");
}

// ── Surface processes ────────────────────────────────────────────────────────

/// Spread stress from colliding fields to continental fields nearby.
fn propagate_orogeny(plate: &mut Plate, grid: &GeodesicGrid, config: &SimConfig) {
    let rings = config.orogeny_propagation_rings;
    if rings == 0 {
        return;
    }
    let sources: Vec<(FieldId, f64)> = plate
        .fields
        .iter()
        .filter(|(_, f)| f.colliding)
        .filter_map(|(id, f)| f.orogeny.as_ref().map(|o| (*id, o.stress)))
        .collect();
    for (source, stress) in sources {
        for (id, ring) in grid.rings(source, rings) {
            let Some(field) = plate.fields.get_mut(&id) else {
                continue;
            };
            if !field.crust.is_continental() {
                continue;
            }
            let crust = &field.crust;
            field
                .orogeny
                .get_or_insert_with(|| Orogeny::new(crust))
                .propagate(stress, ring, rings);
        }
    }
}

/// Age, volcanism, event lifetimes and folding for every owned field.
fn update_surface(
    plate: &mut Plate,
    grid: &GeodesicGrid,
    config: &SimConfig,
    scale: f64,
    dt: f64,
    rng: &mut ChaCha8Rng,
) {
    let q = plate.quaternion;
    let omega = plate.angular_velocity;
    for (id, field) in plate.fields.iter_mut() {
        let p = q * grid.position(*id);
        field.age += omega.cross(&p).norm() * dt;

        let mut finished = false;
        if let Some(va) = field.volcanic_act.as_mut() {
            let out = va.update(field.volcanic_feed, config, dt, rng);
            field.crust.add_volcanic_rocks(out.extrusive, out.intrusive);
            if out.island && field.crust.is_oceanic() {
                field.crust.raise_island();
            }
            if out.erupting && field.volcanic_eruption.is_none() {
                field.volcanic_eruption = VolcanicEruption::maybe_spawn(va.value, scale, config, dt, rng);
            }
            finished = out.finished;
        }
        if finished {
            field.volcanic_act = None;
        }

        if field.earthquake.as_mut().is_some_and(|e| !e.tick(dt)) {
            field.earthquake = None;
        }
        if field.volcanic_eruption.as_mut().is_some_and(|e| !e.tick(dt)) {
            field.volcanic_eruption = None;
        }

        if let Some(orogeny) = field.orogeny.as_ref() {
            orogeny.update(&mut field.crust, config);
        }
    }
}

fn deposit_sediment(plate: &mut Plate, grid: &GeodesicGrid, config: &SimConfig, dt: f64) {
    for field in plate.fields.values_mut() {
        if field.crust.is_oceanic() && field.subduction.is_none() {
            let room = MAX_OCEANIC_SEDIMENT_KM - field.crust.thickness_of(Rock::OceanicSediment);
            field.crust.add_sediment(Rock::OceanicSediment, (config.sediment_rate * dt).min(room));
        }
    }

    let sediment: BTreeMap<FieldId, f64> = plate
        .fields
        .iter()
        .filter(|(_, f)| f.crust.is_oceanic() && f.subduction.is_none())
        .map(|(id, f)| (*id, f.crust.thickness_of(Rock::OceanicSediment)))
        .collect();
    let mut transfers = Vec::new();
    for (id, own) in &sediment {
        if *own <= 0.0 {
            continue;
        }
        let (targets, levels): (Vec<FieldId>, Vec<f64>) = grid
            .neighbors(*id)
            .iter()
            .filter_map(|nb| sediment.get(nb).map(|s| (*nb, *s)))
            .unzip();
        if targets.is_empty() {
            continue;
        }
        let Some(field) = plate.fields.get_mut(id) else {
            continue;
        };
        let out = field.crust.spread_oceanic_sediment(&levels, SEDIMENT_SPREAD_RATE, dt);
        transfers.extend(targets.into_iter().zip(out));
    }
    deliver(plate, transfers, Rock::OceanicSediment);
}

/// Move material from continental high ground to lower owned neighbours.
fn erode(plate: &mut Plate, grid: &GeodesicGrid, config: &SimConfig, dt: f64) {
    let elevations: BTreeMap<FieldId, f64> = plate.fields.iter().map(|(id, f)| (*id, f.elevation(config))).collect();
    let mut transfers = Vec::new();
    for (id, elevation) in &elevations {
        if *elevation <= SEA_LEVEL {
            continue;
        }
        let Some(field) = plate.fields.get_mut(id) else {
            continue;
        };
        if !field.crust.is_continental() || field.subduction.is_some() {
            continue;
        }
        let (targets, levels): (Vec<FieldId>, Vec<f64>) = grid
            .neighbors(*id)
            .iter()
            .filter_map(|nb| elevations.get(nb).map(|e| (*nb, *e)))
            .unzip();
        let out = field
            .crust
            .erode(*elevation, &levels, config.erosion_rate, config.erosion_min_slope, dt);
        transfers.extend(targets.into_iter().zip(out));
    }
    deliver(plate, transfers, Rock::ContinentalSediment);
}

fn deliver(plate: &mut Plate, transfers: Vec<(FieldId, f64)>, rock: Rock) {
    for (id, amount) in transfers {
        if amount <= 0.0 {
            continue;
        }
        if let Some(field) = plate.fields.get_mut(&id) {
            field.crust.add_sediment(rock, amount);
        }
    }
}
