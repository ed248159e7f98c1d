use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;

/// Short-lived seismic event on a subducting field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Earthquake {
    pub magnitude: f64,
    /// Hypocentre depth in [0, 1], following the slab.
    pub depth: f64,
    pub lifespan: f64,
}

impl Earthquake {
    /// Roll for a new earthquake at a slab moving at `rel_speed` with the
    /// given subduction `progress`. `scale` normalises for grid resolution.
    pub fn maybe_spawn<R: Rng>(
        rel_speed: f64,
        progress: f64,
        scale: f64,
        config: &SimConfig,
        dt: f64,
        rng: &mut R,
    ) -> Option<Self> {
        let p = config.earthquake_probability * rel_speed * scale * dt;
        if rng.gen::<f64>() >= p {
            return None;
        }
        // Small events are far more common than large ones.
        let u: f64 = rng.gen();
        let magnitude = 3.0 + 6.0 * u * u;
        let depth = (progress + rng.gen_range(-0.1..0.1)).clamp(0.0, 1.0);
        Some(Self { magnitude, depth, lifespan: config.earthquake_lifespan })
    }

    /// Count down; returns `false` once expired.
    pub fn tick(&mut self, dt: f64) -> bool {
        self.lifespan -= dt;
        self.lifespan > 0.0
    }
}
