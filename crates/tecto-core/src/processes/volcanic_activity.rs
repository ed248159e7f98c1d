//! Arc volcanism above a subducting slab.
//!
//! Intensity follows the slab beneath: it peaks at mid subduction progress and
//! decays once nothing feeds it. Magma blobs spawn with a probability
//! proportional to intensity and rise toward the surface; a blob that arrives
//! while intensity is high opens an eruption window, otherwise it freezes as an
//! intrusion.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagmaBlob {
    /// Remaining depth; the blob reaches the surface at zero.
    pub depth: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolcanicActivity {
    /// Intensity in [0, 1].
    pub value: f64,
    pub magma: Vec<MagmaBlob>,
    /// Time left in the current eruption window.
    pub eruption_time: f64,
    /// Time until a new eruption window may open.
    pub cooldown: f64,
}

/// What happened during one update, for the caller to apply to the crust.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolcanicOutput {
    pub extrusive: f64,
    pub intrusive: f64,
    pub erupting: bool,
    /// An eruption started this step.
    pub eruption_started: bool,
    pub island: bool,
    /// Nothing left to do; the process can be dropped.
    pub finished: bool,
}

impl VolcanicActivity {
    /// `feed` is the subduction progress of the slab below, if any.
    pub fn update<R: Rng>(&mut self, feed: Option<f64>, config: &SimConfig, dt: f64, rng: &mut R) -> VolcanicOutput {
        let mut out = VolcanicOutput::default();

        match feed {
            Some(progress) => self.value = (std::f64::consts::PI * progress.clamp(0.0, 1.0)).sin(),
            None => self.value = (self.value - config.volcanic_decay * dt).max(0.0),
        }

        if self.value > 0.0 && rng.gen::<f64>() < self.value * config.magma_spawn_rate * dt {
            self.magma.push(MagmaBlob { depth: 1.0 });
        }

        let rise = config.magma_rise_speed * dt;
        let mut surfaced = 0usize;
        for blob in &mut self.magma {
            blob.depth -= rise;
            if blob.depth <= 0.0 {
                surfaced += 1;
            }
        }
        self.magma.retain(|b| b.depth > 0.0);

        for _ in 0..surfaced {
            if self.value >= config.eruption_threshold && self.cooldown <= 0.0 {
                self.eruption_time = config.eruption_duration;
                self.cooldown = config.eruption_duration + config.eruption_cooldown;
                out.eruption_started = true;
            } else {
                out.intrusive += config.intrusion_thickness;
            }
        }

        if self.eruption_time > 0.0 {
            out.erupting = true;
            out.extrusive = config.eruption_rock_rate * self.value.max(0.1) * dt;
            self.eruption_time = (self.eruption_time - dt).max(0.0);
            if rng.gen::<f64>() < config.island_probability * dt {
                out.island = true;
            }
        }
        self.cooldown = (self.cooldown - dt).max(0.0);

        out.finished = self.value <= 0.0 && self.magma.is_empty() && self.eruption_time <= 0.0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn intensity_peaks_mid_progress() {
        let c = SimConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut v = VolcanicActivity::default();
        v.update(Some(0.5), &c, 0.1, &mut rng);
        assert_relative_eq!(v.value, 1.0, epsilon = 1e-12);
        v.update(Some(0.1), &c, 0.1, &mut rng);
        assert!(v.value < 0.5);
    }

    #[test]
    fn decays_and_finishes_without_feed() {
        let c = SimConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut v = VolcanicActivity { value: 0.3, ..Default::default() };
        let mut finished = false;
        for _ in 0..200 {
            if v.update(None, &c, 0.1, &mut rng).finished {
                finished = true;
                break;
            }
        }
        assert!(finished);
        assert_eq!(v.value, 0.0);
    }

    #[test]
    fn sustained_feed_erupts_and_respects_cooldown() {
        let c = SimConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut v = VolcanicActivity::default();
        let mut starts = Vec::new();
        let mut extruded = 0.0;
        for step in 0..2000 {
            let out = v.update(Some(0.5), &c, 0.1, &mut rng);
            extruded += out.extrusive;
            if out.eruption_started {
                starts.push(step as f64 * 0.1);
            }
        }
        assert!(!starts.is_empty());
        assert!(extruded > 0.0);
        let min_gap = c.eruption_duration + c.eruption_cooldown - 0.1 - 1e-9;
        assert!(starts.windows(2).all(|w| w[1] - w[0] >= min_gap));
    }
}
