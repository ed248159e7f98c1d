//! Subduction of one field beneath an overriding plate.

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::grid::FieldId;
use crate::plate::PlateId;
use crate::sphere::{angle_between, Vec3};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subduction {
    /// Depth travelled beneath the overriding plate (radians).
    pub dist: f64,
    /// Overriding plate, if the field is still under one.
    pub top_plate: Option<PlateId>,
    /// Overriding field id in the top plate's frame.
    pub top_field: Option<FieldId>,
    /// Velocity of this field relative to the overriding plate, world frame.
    pub rel_velocity: Vec3,
}

/// Result of one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubductionState {
    /// Still subducting; carries the progress gained this step.
    Active { progress_delta: f64 },
    /// Pulled fully back out; the process should be dropped.
    Reverted,
    /// Reached the maximum depth; the field is consumed.
    Consumed,
}

impl Subduction {
    pub fn new(top_plate: PlateId, top_field: FieldId, rel_velocity: Vec3) -> Self {
        Self { dist: 0.0, top_plate: Some(top_plate), top_field: Some(top_field), rel_velocity }
    }

    /// Record the collision partner for this step.
    pub fn collide(&mut self, top_plate: PlateId, top_field: FieldId, rel_velocity: Vec3) {
        self.top_plate = Some(top_plate);
        self.top_field = Some(top_field);
        self.rel_velocity = rel_velocity;
    }

    pub fn progress(&self, max_dist: f64) -> f64 {
        (self.dist * self.dist / (max_dist * max_dist)).min(1.0)
    }

    /// Advance the slab. While colliding the distance grows by the relative
    /// speed but never beyond `neighbor_cap` (the shallowest neighbouring slab
    /// plus one field diameter) and never shrinks; otherwise it reverts.
    pub fn update(&mut self, colliding: bool, neighbor_cap: f64, config: &SimConfig, dt: f64) -> SubductionState {
        let max = config.max_subduction_dist;
        let before = self.progress(max);
        if colliding {
            let advanced = (self.dist + self.rel_velocity.norm() * dt).min(neighbor_cap);
            self.dist = self.dist.max(advanced);
        } else {
            self.top_plate = None;
            self.top_field = None;
            self.dist = (self.dist - config.subduction_revert_speed * dt).max(0.0);
            if self.dist <= 0.0 {
                return SubductionState::Reverted;
            }
        }
        if self.dist >= max {
            return SubductionState::Consumed;
        }
        SubductionState::Active { progress_delta: (self.progress(max) - before).max(0.0) }
    }

    /// Whether the slab should tear off into the overriding plate's subplate.
    ///
    /// `gradient` points toward deeper neighbouring slab; `qualifying` counts
    /// subducting neighbours that contributed to it.
    pub fn should_detach(&self, gradient: &Vec3, qualifying: usize, config: &SimConfig) -> bool {
        self.top_plate.is_some()
            && self.progress(config.max_subduction_dist) > config.detach_progress
            && qualifying >= config.detach_min_neighbors
            && self.rel_velocity.norm() > config.detach_min_speed
            && angle_between(&self.rel_velocity, gradient) > config.detach_angle
    }
}

/// Slab gradient at `position`: neighbour offsets weighted by how much deeper
/// their slab is. Returns the gradient and the number of subducting neighbours.
pub fn slab_gradient(position: &Vec3, progress: f64, neighbors: &[(Vec3, f64)]) -> (Vec3, usize) {
    let mut gradient = Vec3::zeros();
    for (pos, p) in neighbors {
        if *p > progress {
            gradient += (pos - position) * (p - progress);
        }
    }
    (gradient, neighbors.len())
}
