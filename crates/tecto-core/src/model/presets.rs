//! Building plates from a seed image or from a named preset.
//!
//! Every distinct colour of an equirectangular seed image becomes one plate.
//! Plates are created in first-seen order while sweeping grid ids, so the
//! densities handed out by [`Model::add_plate`] follow that order too.

use std::collections::BTreeMap;

use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::Model;
use crate::config::SimConfig;
use crate::crust::Crust;
use crate::error::{Result, TectoError};
use crate::fbm::Fbm;
use crate::field::Field;
use crate::grid::FieldId;
use crate::plate::{HotSpot, PlateId};
use crate::sphere::{great_circle_distance_rad, random_sphere_point, random_tangent, to_latlon, Vec3};

/// Push applied by the single hotspot of the two-plate preset.
pub const TWO_PLATES_PUSH: f64 = 0.05;

/// fBm value above which procedural fields start out continental.
pub const PROCEDURAL_CONTINENT_THRESHOLD: f64 = 0.15;

// ── Seed image ───────────────────────────────────────────────────────────────

/// Row-major RGBA pixels covering the sphere in equirectangular projection.
/// Row 0 is the north edge, column 0 is longitude −180°.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl SeedImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let image = Self { width, height, data };
        image.validate()?;
        Ok(image)
    }

    /// Image whose pixel colours come from `f(lat, lon)` at pixel centres.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(f64, f64) -> [u8; 4]) -> Result<Self> {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for row in 0..height {
            let lat = 90.0 - (row as f64 + 0.5) / height as f64 * 180.0;
            for col in 0..width {
                let lon = (col as f64 + 0.5) / width as f64 * 360.0 - 180.0;
                data.extend_from_slice(&f(lat, lon));
            }
        }
        Self::new(width, height, data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TectoError::InvalidSeedImage(format!("empty image {}x{}", self.width, self.height)));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.data.len() != expected {
            return Err(TectoError::InvalidSeedImage(format!(
                "expected {expected} bytes for {}x{} RGBA, got {}",
                self.width,
                self.height,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// RGBA of the pixel covering world position `p`.
    pub fn sample(&self, p: &Vec3) -> [u8; 4] {
        let (lat, lon) = to_latlon(p);
        let col = (((lon + 180.0) / 360.0) * self.width as f64).floor() as i64;
        let row = (((90.0 - lat) / 180.0) * self.height as f64).floor() as i64;
        let col = col.clamp(0, self.width as i64 - 1) as usize;
        let row = row.clamp(0, self.height as i64 - 1) as usize;
        let i = (row * self.width as usize + col) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// Hue in [0, 1) of an RGB colour; greys map to 0.
pub fn rgb_hue([r, g, b, _]: [u8; 4]) -> f64 {
    let (r, g, b) = (r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let chroma = max - min;
    if chroma <= 0.0 {
        return 0.0;
    }
    let sector = if max == r {
        ((g - b) / chroma).rem_euclid(6.0)
    } else if max == g {
        (b - r) / chroma + 2.0
    } else {
        (r - g) / chroma + 4.0
    };
    (sector / 6.0).rem_euclid(1.0)
}

// ── Plate initialisation ─────────────────────────────────────────────────────

/// Spherical cap painted continental, radius in radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinentCap {
    pub center: Vec3,
    pub radius: f64,
}

/// Post-generation setup handed to [`Model::from_seed_image`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlateInit {
    pub densities: BTreeMap<PlateId, f64>,
    /// Plates made entirely of continental crust.
    pub continental_plates: Vec<PlateId>,
    pub continents: Vec<ContinentCap>,
    pub hot_spots: Vec<HotSpot>,
}

impl PlateInit {
    pub fn apply(&self, model: &mut Model) -> Result<()> {
        if !self.densities.is_empty() {
            model.set_densities(&self.densities)?;
        }
        for id in &self.continental_plates {
            let plate = model.plate_mut(*id).ok_or(TectoError::UnknownPlate(*id))?;
            for field in plate.fields.values_mut() {
                field.crust = Crust::continental();
            }
            plate.mark_dirty();
        }
        for cap in &self.continents {
            model.paint_cap(&cap.center, cap.radius);
        }
        for hs in &self.hot_spots {
            model.set_hot_spot(hs.position, hs.force);
        }
        Ok(())
    }
}

// ── Presets ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Preset {
    /// Ocean on the x ≥ 0 half pushed into a continent on the other half.
    TwoPlates,
    Procedural { seed: u64, plates: usize },
}

impl Preset {
    pub fn build(&self, config: SimConfig) -> Result<Model> {
        match self {
            Preset::TwoPlates => two_plates(config),
            Preset::Procedural { seed, plates } => procedural(config, *seed, *plates),
        }
    }
}

pub fn two_plates(config: SimConfig) -> Result<Model> {
    let mut model = Model::from_partition(config, |p| p.x < 0.0, |west: &bool, _| if *west { 0.1 } else { 0.6 })?;
    let owner = |m: &Model, p: Vec3| {
        m.top_field_at(&p)
            .map(|(id, _)| id)
            .ok_or_else(|| TectoError::InvalidConfig("two-plate preset left a hemisphere empty".into()))
    };
    let ocean = owner(&model, Vec3::new(1.0, 0.0, 0.0))?;
    let continent = owner(&model, Vec3::new(-1.0, 0.0, 0.0))?;
    let init = PlateInit {
        densities: BTreeMap::from([(ocean, 1.0), (continent, 0.0)]),
        continental_plates: vec![continent],
        continents: Vec::new(),
        hot_spots: vec![HotSpot { position: Vec3::new(1.0, 0.0, 0.0), force: Vec3::new(0.0, TWO_PLATES_PUSH, 0.0) }],
    };
    init.apply(&mut model)?;
    model.refresh_plates();
    Ok(model)
}

/// Voronoi plates around random sphere points with an fBm continent mask.
pub fn procedural(config: SimConfig, seed: u64, plates: usize) -> Result<Model> {
    if plates == 0 {
        return Err(TectoError::InvalidConfig("procedural preset needs at least one plate".into()));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let centers: Vec<Vec3> = (0..plates).map(|_| random_sphere_point(&mut rng)).collect();
    let nearest = |p: &Vec3| {
        centers
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.dot(p).total_cmp(&b.1.dot(p)))
            .map_or(0, |(i, _)| i)
    };
    let mut model = Model::from_partition(config, nearest, |i: &usize, _| *i as f64 / plates as f64)?;

    let fbm = Fbm::new(seed as u32, 0.75, 6);
    let grid = model.shared_grid();
    let force = model.config.injected_force;
    for plate in &mut model.plates {
        for field in plate.fields.values_mut() {
            if fbm.sample(grid.position(field.id)) > PROCEDURAL_CONTINENT_THRESHOLD {
                field.crust = Crust::continental();
            }
        }
        let Some(anchor) = plate.fields.keys().next().map(|id| *grid.position(*id)) else {
            continue;
        };
        let position = centers[nearest(&anchor)];
        plate.hot_spot = HotSpot { position, force: random_tangent(&position, &mut rng) * force };
        plate.mark_dirty();
    }
    model.refresh_plates();
    Ok(model)
}

// ── Model construction ───────────────────────────────────────────────────────

impl Model {
    /// One plate per distinct `key` value over the grid, in first-seen order.
    /// `hue` receives the key and the plate's creation index.
    pub fn from_partition<K: Ord>(
        config: SimConfig,
        mut key: impl FnMut(&Vec3) -> K,
        hue: impl Fn(&K, usize) -> f64,
    ) -> Result<Self> {
        let mut model = Model::new(config)?;
        let grid = model.shared_grid();
        let mut owners: BTreeMap<K, PlateId> = BTreeMap::new();
        let mut members: BTreeMap<PlateId, Vec<FieldId>> = BTreeMap::new();
        for gf in grid.fields() {
            let k = key(&gf.position);
            let plate = match owners.get(&k) {
                Some(id) => *id,
                None => {
                    let id = model.add_plate(hue(&k, owners.len()));
                    owners.insert(k, id);
                    id
                }
            };
            members.entry(plate).or_default().push(gf.id);
        }
        for (plate_id, ids) in members {
            if let Some(plate) = model.plate_mut(plate_id) {
                for id in ids {
                    plate.insert_field(Field::oceanic(id));
                }
            }
        }
        model.refresh_plates();
        Ok(model)
    }

    pub fn from_seed_image(
        config: SimConfig,
        image: &SeedImage,
        init: impl FnOnce(&mut Model) -> Result<()>,
    ) -> Result<Self> {
        image.validate()?;
        let mut model = Self::from_partition(config, |p| image.sample(p), |rgba: &[u8; 4], _| rgb_hue(*rgba))?;
        init(&mut model)?;
        model.refresh_plates();
        info!("seeded {} plates over {} fields", model.plates.len(), model.field_count());
        Ok(model)
    }

    /// Paint continental crust on every owned field within `radius` of `center`.
    pub fn paint_cap(&mut self, center: &Vec3, radius: f64) -> usize {
        let center = center.normalize();
        let grid = self.shared_grid();
        let mut count = 0;
        for plate in &mut self.plates {
            let q = plate.quaternion;
            let mut touched = false;
            for field in plate.fields.values_mut() {
                let p = q * grid.position(field.id);
                if great_circle_distance_rad(&p, &center) <= radius {
                    field.crust = Crust::continental();
                    field.subduction = None;
                    touched = true;
                    count += 1;
                }
            }
            if touched {
                plate.mark_dirty();
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_config() -> SimConfig {
        SimConfig { divisions: 6, ..SimConfig::default() }
    }

    #[test]
    fn seed_image_rejects_wrong_length() {
        assert!(matches!(SeedImage::new(4, 2, vec![0; 31]), Err(TectoError::InvalidSeedImage(_))));
        assert!(SeedImage::new(0, 2, Vec::new()).is_err());
        assert!(SeedImage::new(4, 2, vec![0; 32]).is_ok());
    }

    #[test]
    fn seed_image_samples_equirectangular() {
        let img = SeedImage::from_fn(8, 4, |lat, lon| [(lat > 0.0) as u8, (lon > 0.0) as u8, 0, 255]).unwrap();
        assert_eq!(img.sample(&Vec3::new(0.5, 0.5, 0.7)), [1, 1, 0, 255]);
        assert_eq!(img.sample(&Vec3::new(0.5, -0.5, -0.7)), [0, 0, 0, 255]);
        assert_eq!(img.sample(&Vec3::new(0.0, 0.0, 1.0))[0], 1);
    }

    #[test]
    fn hue_of_primaries() {
        assert_abs_diff_eq!(rgb_hue([255, 0, 0, 255]), 0.0);
        assert_abs_diff_eq!(rgb_hue([0, 255, 0, 255]), 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rgb_hue([0, 0, 255, 255]), 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rgb_hue([90, 90, 90, 255]), 0.0);
    }

    #[test]
    fn seed_image_colours_become_plates() {
        let img = SeedImage::from_fn(16, 8, |lat, _| if lat >= 0.0 { [255, 0, 0, 255] } else { [0, 0, 255, 255] }).unwrap();
        let mut called = false;
        let m = Model::from_seed_image(small_config(), &img, |_| {
            called = true;
            Ok(())
        })
        .unwrap();
        assert!(called);
        assert_eq!(m.plates().len(), 2);
        assert_eq!(m.field_count(), m.grid().len());
        let north = m.plate(0).unwrap();
        assert!(north.fields.contains_key(&0));
        assert_abs_diff_eq!(north.hue, 0.0);
        assert!(m.plate(1).unwrap().fields.contains_key(&1));
    }

    #[test]
    fn init_errors_propagate() {
        let img = SeedImage::from_fn(4, 2, |_, _| [1, 2, 3, 255]).unwrap();
        let init = PlateInit { continental_plates: vec![7], ..PlateInit::default() };
        let r = Model::from_seed_image(small_config(), &img, |m| init.apply(m));
        assert!(matches!(r, Err(TectoError::UnknownPlate(7))));
    }

    #[test]
    fn two_plates_layout() {
        let m = two_plates(small_config()).unwrap();
        assert_eq!(m.plates().len(), 2);
        let continent = &m.plates()[0];
        let ocean = &m.plates()[1];
        assert_ne!(continent.id, ocean.id);
        assert_abs_diff_eq!(continent.density, 0.0);
        assert!(continent.fields.values().all(|f| f.is_continental()));
        assert!(ocean.fields.values().all(|f| f.is_oceanic()));
        assert!(ocean.hot_spot.force.norm() > 0.0);
        assert_abs_diff_eq!(continent.hot_spot.force.norm(), 0.0);
        let grid = m.grid();
        assert!(continent.fields.keys().all(|id| grid.position(*id).x < 0.0));
    }

    #[test]
    fn procedural_is_seeded() {
        let a = procedural(small_config(), 11, 5).unwrap();
        let b = procedural(small_config(), 11, 5).unwrap();
        assert_eq!(a.plates().len(), b.plates().len());
        assert!(a.plates().len() <= 5 && a.plates().len() >= 2);
        for (pa, pb) in a.plates().iter().zip(b.plates()) {
            assert_eq!(pa.fields, pb.fields);
        }
        assert_eq!(a.field_count(), a.grid().len());
        assert!(procedural(small_config(), 11, 0).is_err());
    }

    #[test]
    fn paint_cap_marks_nearby_fields() {
        let mut m = Model::from_partition(small_config(), |_| (), |_, _| 0.0).unwrap();
        let painted = m.paint_cap(&Vec3::new(0.0, 0.0, 1.0), 0.3);
        assert!(painted > 1);
        let plate = &m.plates()[0];
        assert!(plate.fields[&0].is_continental());
        assert!(plate.fields[&1].is_oceanic());
    }
}
