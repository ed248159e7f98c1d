//! Mountain building from continent–continent collision.

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::crust::Crust;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orogeny {
    /// Accumulated folding stress in [0, 1].
    pub stress: f64,
    /// Crust thickness when the orogeny started (km).
    pub base_thickness: f64,
}

impl Orogeny {
    pub fn new(crust: &Crust) -> Self {
        Self { stress: 0.0, base_thickness: crust.thickness() }
    }

    /// Stress from a collision at relative speed `speed`.
    pub fn collide(&mut self, speed: f64, config: &SimConfig, dt: f64) {
        self.stress = (self.stress + config.orogeny_stress_rate * speed * dt).min(1.0);
    }

    /// Stress received from a colliding field `ring` hops away.
    pub fn propagate(&mut self, source_stress: f64, ring: usize, rings: usize) {
        let falloff = 1.0 - ring as f64 / (rings as f64 + 1.0);
        self.stress = self.stress.max(source_stress * falloff);
    }

    /// Fold and thicken the crust according to the current stress.
    pub fn update(&self, crust: &mut Crust, config: &SimConfig) {
        crust.fold(self.stress);
        let target = self.base_thickness * (1.0 + self.stress * config.orogeny_max_thickening);
        if crust.thickness() < target {
            crust.set_thickness(target);
        }
    }
}
