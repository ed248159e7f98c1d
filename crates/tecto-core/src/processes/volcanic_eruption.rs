use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;

/// Visible eruption event, spawned from arc eruptions or divergent boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolcanicEruption {
    pub lifespan: f64,
}

impl VolcanicEruption {
    /// Roll for an eruption driven by `speed` (arc intensity or spreading rate).
    pub fn maybe_spawn<R: Rng>(speed: f64, scale: f64, config: &SimConfig, dt: f64, rng: &mut R) -> Option<Self> {
        let p = config.volcanic_eruption_probability * speed * scale * dt;
        (rng.gen::<f64>() < p).then(|| Self { lifespan: config.volcanic_eruption_lifespan })
    }

    pub fn tick(&mut self, dt: f64) -> bool {
        self.lifespan -= dt;
        self.lifespan > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn certain_spawn_then_expiry() {
        let c = SimConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut e = VolcanicEruption::maybe_spawn(100.0, 1.0, &c, 1.0, &mut rng).unwrap();
        let steps = (0..100).take_while(|_| e.tick(0.25)).count();
        assert_eq!(steps, 5);
    }
}
