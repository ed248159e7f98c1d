//! Per-field rock column.
//!
//! A crust is a stack of rock layers ordered top to bottom by each rock's
//! fixed stacking index. Every public mutation finishes with `sort_layers`, so
//! the ordering (and the merge of duplicate rock layers) always holds between
//! calls. Thickness is in kilometres.

use serde::{Deserialize, Serialize};

/// Reference thickness of fresh oceanic crust (km).
pub const OCEANIC_THICKNESS_KM: f64 = 7.0;

/// Reference thickness of continental crust (km).
pub const CONTINENTAL_THICKNESS_KM: f64 = 40.0;

/// Crust at least this thick counts as continental and resists subduction.
pub const CONTINENTAL_MIN_THICKNESS_KM: f64 = 20.0;

/// Continental crust thinner than this can no longer be stretched.
pub const STRETCHABLE_MIN_THICKNESS_KM: f64 = 25.0;

/// Elevation units per kilometre of crust.
pub const THICKNESS_TO_ELEVATION: f64 = 0.015;

/// Elevation of the ocean surface in model units.
pub const SEA_LEVEL: f64 = 0.5;

/// Fraction of non-sediment rock lost to the mantle per unit of subduction.
const SUBDUCTION_LOSS: f64 = 0.5;

/// Layers thinner than this are dropped.
const MIN_LAYER_KM: f64 = 1e-6;

// ── Rocks ────────────────────────────────────────────────────────────────────

/// Rock kinds, declared in stacking order (top first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rock {
    OceanicSediment,
    ContinentalSediment,
    Limestone,
    Shale,
    Sandstone,
    Andesite,
    Basalt,
    Granite,
    Diorite,
    Gabbro,
    MaficRocks,
}

impl Rock {
    pub const ALL: [Rock; 11] = [
        Rock::OceanicSediment,
        Rock::ContinentalSediment,
        Rock::Limestone,
        Rock::Shale,
        Rock::Sandstone,
        Rock::Andesite,
        Rock::Basalt,
        Rock::Granite,
        Rock::Diorite,
        Rock::Gabbro,
        Rock::MaficRocks,
    ];

    /// Position in the column; lower values sit on top.
    pub fn stacking_index(self) -> u8 {
        self as u8
    }

    pub fn is_sediment(self) -> bool {
        matches!(
            self,
            Rock::OceanicSediment | Rock::ContinentalSediment | Rock::Limestone | Rock::Shale | Rock::Sandstone
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Rock::OceanicSediment => "Oceanic sediment",
            Rock::ContinentalSediment => "Continental sediment",
            Rock::Limestone => "Limestone",
            Rock::Shale => "Shale",
            Rock::Sandstone => "Sandstone",
            Rock::Andesite => "Andesite",
            Rock::Basalt => "Basalt",
            Rock::Granite => "Granite",
            Rock::Diorite => "Diorite",
            Rock::Gabbro => "Gabbro",
            Rock::MaficRocks => "Mafic rocks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RockLayer {
    pub rock: Rock,
    pub thickness: f64,
    /// Degree of folding in [0, 1].
    pub folding: f64,
}

impl RockLayer {
    pub fn new(rock: Rock, thickness: f64) -> Self {
        Self { rock, thickness, folding: 0.0 }
    }
}

// ── Crust ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Crust {
    layers: Vec<RockLayer>,
}

impl Crust {
    pub fn from_layers(layers: Vec<RockLayer>) -> Self {
        let mut crust = Self { layers };
        crust.sort_layers();
        crust
    }

    /// Fresh oceanic crust: one third basalt over two thirds gabbro.
    pub fn oceanic() -> Self {
        let mut crust = Self::default();
        crust.add_basalt_and_gabbro(OCEANIC_THICKNESS_KM);
        crust
    }

    pub fn continental() -> Self {
        Self::from_layers(vec![RockLayer::new(Rock::Granite, CONTINENTAL_THICKNESS_KM)])
    }

    pub fn layers(&self) -> &[RockLayer] {
        &self.layers
    }

    pub fn thickness(&self) -> f64 {
        self.layers.iter().map(|l| l.thickness).sum()
    }

    pub fn thickness_of(&self, rock: Rock) -> f64 {
        self.layers.iter().filter(|l| l.rock == rock).map(|l| l.thickness).sum()
    }

    pub fn is_continental(&self) -> bool {
        self.thickness() >= CONTINENTAL_MIN_THICKNESS_KM
    }

    pub fn is_oceanic(&self) -> bool {
        !self.is_continental()
    }

    pub fn can_subduct(&self) -> bool {
        !self.is_continental()
    }

    pub fn can_be_stretched(&self) -> bool {
        self.thickness() >= STRETCHABLE_MIN_THICKNESS_KM
    }

    /// Elevation contributed by thickness alone.
    pub fn base_elevation(&self) -> f64 {
        self.thickness() * THICKNESS_TO_ELEVATION
    }

    /// Thickest rock in the column, if any.
    pub fn dominant_rock(&self) -> Option<Rock> {
        self.layers
            .iter()
            .max_by(|a, b| a.thickness.total_cmp(&b.thickness).then(b.rock.cmp(&a.rock)))
            .map(|l| l.rock)
    }

    pub fn top_rock(&self) -> Option<Rock> {
        self.layers.first().map(|l| l.rock)
    }

    pub fn max_folding(&self) -> f64 {
        self.layers.iter().map(|l| l.folding).fold(0.0, f64::max)
    }

    // ── Mutations ──────────────────────────────────────────────────────────

    pub fn add_layer(&mut self, rock: Rock, thickness: f64) {
        if thickness <= 0.0 {
            return;
        }
        self.layers.push(RockLayer::new(rock, thickness));
        self.sort_layers();
    }

    pub fn add_basalt_and_gabbro(&mut self, thickness: f64) {
        if thickness <= 0.0 {
            return;
        }
        self.layers.push(RockLayer::new(Rock::Basalt, thickness / 3.0));
        self.layers.push(RockLayer::new(Rock::Gabbro, thickness * 2.0 / 3.0));
        self.sort_layers();
    }

    /// Extrusive andesite plus an intrusive diorite root of equal thickness.
    pub fn add_volcanic_rocks(&mut self, extrusive: f64, intrusive: f64) {
        if extrusive > 0.0 {
            self.layers.push(RockLayer::new(Rock::Andesite, extrusive));
        }
        if intrusive > 0.0 {
            self.layers.push(RockLayer::new(Rock::Diorite, intrusive));
        }
        self.sort_layers();
    }

    pub fn add_sediment(&mut self, rock: Rock, thickness: f64) {
        if rock.is_sediment() {
            self.add_layer(rock, thickness);
        }
    }

    /// Raise every layer's folding to at least `amount`; folding never decreases.
    pub fn fold(&mut self, amount: f64) {
        let amount = amount.clamp(0.0, 1.0);
        for layer in &mut self.layers {
            layer.folding = layer.folding.max(amount);
        }
        self.sort_layers();
    }

    /// Uniformly rescale all layers to reach `thickness`.
    pub fn set_thickness(&mut self, thickness: f64) {
        let current = self.thickness();
        if current <= 0.0 {
            if thickness > 0.0 {
                self.layers = vec![RockLayer::new(Rock::Granite, thickness)];
            }
            return;
        }
        let scale = thickness.max(0.0) / current;
        for layer in &mut self.layers {
            layer.thickness *= scale;
        }
        self.sort_layers();
    }

    /// Remove up to `thickness` km from the top of the column, returning the
    /// removed material as layers.
    pub fn remove_top(&mut self, thickness: f64) -> Vec<RockLayer> {
        let mut remaining = thickness.max(0.0);
        let mut removed = Vec::new();
        for layer in &mut self.layers {
            if remaining <= 0.0 {
                break;
            }
            let take = layer.thickness.min(remaining);
            layer.thickness -= take;
            remaining -= take;
            removed.push(RockLayer { rock: layer.rock, thickness: take, folding: layer.folding });
        }
        self.sort_layers();
        removed
    }

    /// Move material downhill. Returns the thickness sent to each neighbour,
    /// in the order of `neighbor_elevations`. Outflow to a neighbour never
    /// exceeds half the slope above `min_slope`, so the column cannot overshoot.
    pub fn erode(&mut self, elevation: f64, neighbor_elevations: &[f64], rate: f64, min_slope: f64, dt: f64) -> Vec<f64> {
        let k = (rate * dt).clamp(0.0, 0.5);
        let mut out: Vec<f64> = neighbor_elevations
            .iter()
            .map(|&e| {
                let excess = elevation - e - min_slope;
                if excess > 0.0 {
                    k * excess * 0.5 / THICKNESS_TO_ELEVATION
                } else {
                    0.0
                }
            })
            .collect();

        let wanted: f64 = out.iter().sum();
        let available = (self.thickness() - CONTINENTAL_MIN_THICKNESS_KM).max(0.0);
        if wanted > available && wanted > 0.0 {
            let scale = available / wanted;
            out.iter_mut().for_each(|v| *v *= scale);
        }
        let total: f64 = out.iter().sum();
        if total > 0.0 {
            self.remove_top(total);
        }
        out
    }

    /// Even out oceanic sediment with neighbouring ocean floor. Returns the
    /// sediment thickness sent to each neighbour.
    pub fn spread_oceanic_sediment(&mut self, neighbor_sediment: &[f64], rate: f64, dt: f64) -> Vec<f64> {
        let own = self.thickness_of(Rock::OceanicSediment);
        let k = (rate * dt).clamp(0.0, 1.0) / (neighbor_sediment.len() as f64 + 1.0);
        let out: Vec<f64> = neighbor_sediment
            .iter()
            .map(|&s| if own > s { (own - s) * k } else { 0.0 })
            .collect();
        let total: f64 = out.iter().sum();
        if total > 0.0 {
            if let Some(layer) = self.layers.iter_mut().find(|l| l.rock == Rock::OceanicSediment) {
                layer.thickness -= total.min(layer.thickness);
            }
            self.sort_layers();
        }
        out
    }

    /// Consume `fraction` of the column into the mantle. Sediments are scraped
    /// off and returned for the overriding crust; a share of the remaining rock
    /// is lost.
    pub fn subduct(&mut self, fraction: f64) -> Vec<RockLayer> {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut scraped = Vec::new();
        for layer in &mut self.layers {
            if layer.rock.is_sediment() {
                let take = layer.thickness * fraction;
                layer.thickness -= take;
                scraped.push(RockLayer { rock: layer.rock, thickness: take, folding: layer.folding });
            } else {
                layer.thickness *= 1.0 - fraction * SUBDUCTION_LOSS;
            }
        }
        self.sort_layers();
        scraped.retain(|l| l.thickness > MIN_LAYER_KM);
        scraped
    }

    /// Accept material removed from another column.
    pub fn accrete(&mut self, layers: &[RockLayer]) {
        for layer in layers {
            if layer.thickness > 0.0 {
                self.layers.push(*layer);
            }
        }
        self.sort_layers();
    }

    /// Thin this column by `factor` and return a copy of the thinned column.
    pub fn stretch(&mut self, factor: f64) -> Crust {
        let target = self.thickness() * factor;
        self.set_thickness(target);
        self.clone()
    }

    /// Build a volcanic island on top of this column.
    pub fn raise_island(&mut self) {
        let missing = STRETCHABLE_MIN_THICKNESS_KM - self.thickness();
        if missing > 0.0 {
            self.add_volcanic_rocks(missing * 0.4, missing * 0.6);
        }
    }

    /// Restore the stacking order and merge layers of the same rock.
    pub fn sort_layers(&mut self) {
        self.layers.retain(|l| l.thickness > MIN_LAYER_KM);
        self.layers.sort_by_key(|l| l.rock.stacking_index());
        let mut merged: Vec<RockLayer> = Vec::with_capacity(self.layers.len());
        for layer in self.layers.drain(..) {
            match merged.last_mut() {
                Some(last) if last.rock == layer.rock => {
                    last.thickness += layer.thickness;
                    last.folding = last.folding.max(layer.folding);
                }
                _ => merged.push(layer),
            }
        }
        self.layers = merged;
    }
}
