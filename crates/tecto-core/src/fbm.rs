//! Seamless fBm over the sphere, used to mask continents in procedural presets.
//!
//! 3D Perlin noise is sampled at the point itself. Octave i has amplitude
//! `lacunarity^(−H·i)` and frequency `base_frequency · lacunarity^i`.
use noise::{NoiseFn, Perlin};

use crate::sphere::Vec3;

pub struct Fbm {
    pub h: f64,
    pub octaves: u32,
    pub lacunarity: f64,
    /// Frequency of the first octave, in cycles per unit of sphere radius.
    pub base_frequency: f64,
    noise: Perlin,
}

impl Fbm {
    /// Lacunarity starts at 2 and the first octave at 1.5 cycles per radius.
    pub fn new(seed: u32, h: f64, octaves: u32) -> Self {
        Self { h, octaves, lacunarity: 2.0, base_frequency: 1.5, noise: Perlin::new(seed) }
    }

    #[inline]
    fn gain(&self) -> f64 {
        self.lacunarity.powf(-self.h)
    }

    /// Unscaled value at `p`, roughly within ±1 for H near 0.75.
    pub fn sample(&self, p: &Vec3) -> f64 {
        let gain = self.gain();
        let mut value = 0.0f64;
        let mut amp = 1.0f64;
        let mut freq = self.base_frequency;
        for _ in 0..self.octaves {
            value += amp * self.noise.get([p.x * freq, p.y * freq, p.z * freq]);
            amp *= gain;
            freq *= self.lacunarity;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::from_latlon;

    fn samples(fbm: &Fbm) -> Vec<f64> {
        let mut out = Vec::new();
        for lat in (-80..=80).step_by(10) {
            for lon in (-180..180).step_by(10) {
                out.push(fbm.sample(&from_latlon(lat as f64, lon as f64)));
            }
        }
        out
    }

    #[test]
    fn mask_varies_over_the_globe() {
        let v = samples(&Fbm::new(42, 0.75, 6));
        let min = v.iter().copied().fold(f64::INFINITY, f64::min);
        let max = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!(max - min > 0.1);
    }

    #[test]
    fn mask_follows_seed() {
        assert_eq!(samples(&Fbm::new(7, 0.75, 6)), samples(&Fbm::new(7, 0.75, 6)));
        assert_ne!(samples(&Fbm::new(7, 0.75, 6)), samples(&Fbm::new(8, 0.75, 6)));
    }
}
