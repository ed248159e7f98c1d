//! Mutable per-field geological state.
//!
//! A field is owned by exactly one plate or subplate at a time; the owner is
//! the map the field lives in, so there is no back reference to keep in sync.
//! The serialized form of a `Field` is the snapshot's field record: transient
//! per-step flags are skipped and absent processes are omitted.

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::crust::{Crust, SEA_LEVEL};
use crate::grid::FieldId;
use crate::plate::PlateId;
use crate::processes::{Earthquake, Orogeny, Subduction, VolcanicActivity, VolcanicEruption};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: FieldId,
    /// Distance travelled since creation (radians), a proxy for geological age.
    pub age: f64,
    pub crust: Crust,
    #[serde(default)]
    pub boundary: bool,
    #[serde(default)]
    pub marked: bool,
    /// Travel without any overlapping plate; only used on adjacent candidates.
    #[serde(default)]
    pub no_collision_dist: f64,
    /// Took part in a contact during the previous step.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collided_last_step: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subduction: Option<Subduction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orogeny: Option<Orogeny>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volcanic_act: Option<VolcanicActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earthquake: Option<Earthquake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volcanic_eruption: Option<VolcanicEruption>,

    // ── Transient, reset at the end of every step ──────────────────────────
    #[serde(skip)]
    pub colliding: bool,
    #[serde(skip)]
    pub dragging_plate: Option<PlateId>,
    /// Subduction progress of the slab below, set by collisions and subplates.
    #[serde(skip)]
    pub volcanic_feed: Option<f64>,
    #[serde(skip)]
    pub dead: bool,
}

impl Field {
    pub fn new(id: FieldId, crust: Crust) -> Self {
        Self {
            id,
            age: 0.0,
            crust,
            boundary: false,
            marked: false,
            no_collision_dist: 0.0,
            collided_last_step: false,
            subduction: None,
            orogeny: None,
            volcanic_act: None,
            earthquake: None,
            volcanic_eruption: None,
            colliding: false,
            dragging_plate: None,
            volcanic_feed: None,
            dead: false,
        }
    }

    pub fn oceanic(id: FieldId) -> Self {
        Self::new(id, Crust::oceanic())
    }

    pub fn continental(id: FieldId) -> Self {
        Self::new(id, Crust::continental())
    }

    /// Same state under a different grid id, with transient flags cleared.
    pub fn relocated(&self, id: FieldId) -> Self {
        let mut f = self.clone();
        f.id = id;
        f.reset_transient();
        f
    }

    pub fn is_continental(&self) -> bool {
        self.crust.is_continental()
    }

    pub fn is_oceanic(&self) -> bool {
        self.crust.is_oceanic()
    }

    pub fn normalized_age(&self, config: &SimConfig) -> f64 {
        (self.age / config.max_age()).min(1.0)
    }

    pub fn subduction_progress(&self, config: &SimConfig) -> Option<f64> {
        self.subduction.as_ref().map(|s| s.progress(config.max_subduction_dist))
    }

    /// Surface elevation in model units; sea level is [`SEA_LEVEL`].
    pub fn elevation(&self, config: &SimConfig) -> f64 {
        let mut modifier = 0.0;
        if self.is_oceanic() {
            if let Some(progress) = self.subduction_progress(config) {
                modifier -= progress * config.subduction_depression;
            } else {
                modifier += config.ridge_elevation_bonus * (1.0 - self.normalized_age(config));
            }
        }
        self.crust.base_elevation() + modifier
    }

    pub fn above_sea_level(&self, config: &SimConfig) -> bool {
        self.elevation(config) > SEA_LEVEL
    }

    /// Interior fields the optimized collision scan must still visit.
    pub fn needs_collision_scan(&self) -> bool {
        self.collided_last_step || self.subduction.is_some()
    }

    pub fn reset_transient(&mut self) {
        self.collided_last_step = self.colliding;
        self.colliding = false;
        self.dragging_plate = None;
        self.volcanic_feed = None;
        self.dead = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::Vec3;
    use approx::assert_relative_eq;

    #[test]
    fn young_ocean_sits_higher_than_old_ocean() {
        let c = SimConfig::default();
        let young = Field::oceanic(3);
        let mut old = Field::oceanic(4);
        old.age = c.max_age() * 2.0;
        assert_relative_eq!(young.elevation(&c) - old.elevation(&c), c.ridge_elevation_bonus, epsilon = 1e-12);
        assert_eq!(old.normalized_age(&c), 1.0);
        assert!(!young.above_sea_level(&c));
    }

    #[test]
    fn subduction_depresses_ocean() {
        let c = SimConfig::default();
        let mut f = Field::oceanic(1);
        f.age = c.max_age();
        let before = f.elevation(&c);
        let mut s = Subduction::new(2, 5, Vec3::zeros());
        s.dist = c.max_subduction_dist;
        f.subduction = Some(s);
        assert_relative_eq!(before - f.elevation(&c), c.subduction_depression, epsilon = 1e-12);
    }

    #[test]
    fn continent_is_above_sea_level() {
        let c = SimConfig::default();
        assert!(Field::continental(0).above_sea_level(&c));
    }

    #[test]
    fn record_omits_absent_processes_and_transients() {
        let mut f = Field::oceanic(9);
        f.colliding = true;
        let json = serde_json::to_string(&f).unwrap();
        assert!(!json.contains("subduction"));
        assert!(!json.contains("colliding"));
        let back: Field = serde_json::from_str(&json).unwrap();
        assert!(!back.colliding);
        assert_eq!(back.crust, f.crust);
    }

    #[test]
    fn contact_is_remembered_for_one_step() {
        let mut f = Field::continental(2);
        assert!(!f.needs_collision_scan());
        f.colliding = true;
        f.reset_transient();
        assert!(!f.colliding);
        assert!(f.needs_collision_scan());
        let back: Field = serde_json::from_str(&serde_json::to_string(&f).unwrap()).unwrap();
        assert!(back.collided_last_step);
        f.reset_transient();
        assert!(!f.needs_collision_scan());
    }
}
