//! Simulation configuration.
//!
//! Every tuned constant of the engine lives here as a named, overridable
//! field. Values are calibrated for visual plausibility, not geophysical
//! accuracy; distances are in radians on the unit sphere and times in model
//! time units unless a field name says otherwise.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TectoError};

/// Numerical scheme used to advance plate orientation and angular velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integration {
    Euler,
    Verlet,
    Rk4,
}

/// How "which field is under this point" queries are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialIndexMode {
    /// k-d tree nearest neighbour, O(log n), exact.
    Exact,
    /// Precomputed latitude/longitude raster, O(1), approximate near field edges.
    Raster,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimConfig {
    // ── Grid ────────────────────────────────────────────────────────────────
    /// Geodesic subdivision parameter; the grid has 10·d² + 2 fields.
    pub divisions: u32,
    pub spatial_index: SpatialIndexMode,
    /// Raster bins per field diameter along each axis.
    pub raster_bins_per_field: f64,

    // ── Stepping ────────────────────────────────────────────────────────────
    pub seed: u64,
    pub timestep: f64,
    pub integration: Integration,
    /// RK4 also integrates rotation with the 1:2:2:1 velocity combination.
    pub rk4_rotation: bool,
    pub max_angular_speed: f64,
    /// Kinetic energy above which the model is flagged as diverged.
    pub max_kinetic_energy: f64,
    /// Only scan boundary fields and fields with active processes for collisions.
    pub optimized_collisions: bool,

    // ── Plate physics ───────────────────────────────────────────────────────
    pub oceanic_field_density: f64,
    pub continental_field_density: f64,
    /// Linear drag coefficient opposing each field's velocity (per unit area).
    pub linear_drag: f64,
    /// Coefficient of the drag pulling a field toward a colliding plate's velocity.
    pub collision_drag: f64,
    /// Exponent applied to the relative speed in the collision drag.
    pub collision_drag_exponent: f64,
    pub constant_hot_spots: bool,
    /// Linear decay of hotspot force magnitude per unit time.
    pub hot_spot_decay: f64,

    // ── Plate lifecycle ─────────────────────────────────────────────────────
    /// Plates owning more than this fraction of the grid are divided.
    pub plate_division_threshold: f64,
    pub center_update_interval: u64,
    /// Minimum number of safe fields needed to define a plate center.
    pub min_center_fields: usize,
    /// No-collision travel (in field diameters) before an adjacent field is annexed.
    pub new_field_distance: f64,
    /// Owned neighbours required before an adjacent field is annexed.
    pub new_field_min_neighbors: usize,
    /// Thickness factor applied when continental crust is stretched into a new field.
    pub continental_stretch_factor: f64,

    // ── Subduction ──────────────────────────────────────────────────────────
    pub max_subduction_dist: f64,
    pub subduction_revert_speed: f64,
    pub subduction_depression: f64,
    pub detach_progress: f64,
    pub detach_min_speed: f64,
    /// Angle (radians) between relative velocity and slab gradient that triggers detachment.
    pub detach_angle: f64,
    pub detach_min_neighbors: usize,
    pub subplate_sinking_speed: f64,

    // ── Orogeny ─────────────────────────────────────────────────────────────
    pub orogeny_stress_rate: f64,
    pub orogeny_propagation_rings: usize,
    /// Maximum relative thickening of folded crust (1.0 doubles it).
    pub orogeny_max_thickening: f64,

    // ── Volcanism ───────────────────────────────────────────────────────────
    pub volcanic_decay: f64,
    pub magma_spawn_rate: f64,
    pub magma_rise_speed: f64,
    pub eruption_threshold: f64,
    pub eruption_duration: f64,
    pub eruption_cooldown: f64,
    /// Volcanic rock thickness (km) added per unit time while erupting.
    pub eruption_rock_rate: f64,
    /// Intrusive rock thickness (km) left by a blob that stalls below the surface.
    pub intrusion_thickness: f64,
    pub island_probability: f64,

    // ── Events ──────────────────────────────────────────────────────────────
    pub earthquake_probability: f64,
    pub earthquake_lifespan: f64,
    pub volcanic_eruption_probability: f64,
    pub volcanic_eruption_lifespan: f64,
    /// Field count at which event probabilities are unscaled.
    pub reference_field_count: f64,

    // ── Crust ───────────────────────────────────────────────────────────────
    pub oceanic_ridge_width_km: f64,
    pub ridge_elevation_bonus: f64,
    pub erosion: bool,
    pub erosion_rate: f64,
    /// Elevation difference below which no material is eroded downhill.
    pub erosion_min_slope: f64,
    pub sediments: bool,
    /// Oceanic sediment (km) deposited per unit time on ageing ocean floor.
    pub sediment_rate: f64,
    pub island_max_size: usize,

    // ── Motion injection ────────────────────────────────────────────────────
    pub stall_speed_threshold: f64,
    pub stall_duration: f64,
    pub injected_force: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            divisions: 32,
            spatial_index: SpatialIndexMode::Raster,
            raster_bins_per_field: 4.0,

            seed: 0,
            timestep: 0.1,
            integration: Integration::Verlet,
            rk4_rotation: true,
            max_angular_speed: 0.03,
            max_kinetic_energy: 1.0,
            optimized_collisions: true,

            oceanic_field_density: 3.0,
            continental_field_density: 2.7,
            linear_drag: 0.03,
            collision_drag: 0.01,
            collision_drag_exponent: 0.5,
            constant_hot_spots: false,
            hot_spot_decay: 0.0005,

            plate_division_threshold: 0.6,
            center_update_interval: 20,
            min_center_fields: 5,
            new_field_distance: 0.9,
            new_field_min_neighbors: 2,
            continental_stretch_factor: 0.8,

            max_subduction_dist: 0.12,
            subduction_revert_speed: 0.005,
            subduction_depression: 0.15,
            detach_progress: 0.3,
            detach_min_speed: 0.002,
            detach_angle: 0.55 * std::f64::consts::PI,
            detach_min_neighbors: 5,
            subplate_sinking_speed: 0.005,

            orogeny_stress_rate: 5.0,
            orogeny_propagation_rings: 3,
            orogeny_max_thickening: 1.0,

            volcanic_decay: 0.5,
            magma_spawn_rate: 2.0,
            magma_rise_speed: 0.5,
            eruption_threshold: 0.5,
            eruption_duration: 2.0,
            eruption_cooldown: 5.0,
            eruption_rock_rate: 0.5,
            intrusion_thickness: 0.2,
            island_probability: 0.002,

            earthquake_probability: 2.0,
            earthquake_lifespan: 1.0,
            volcanic_eruption_probability: 1.0,
            volcanic_eruption_lifespan: 1.5,
            reference_field_count: 10242.0,

            oceanic_ridge_width_km: 1200.0,
            ridge_elevation_bonus: 0.25,
            erosion: true,
            erosion_rate: 0.1,
            erosion_min_slope: 0.05,
            sediments: true,
            sediment_rate: 0.02,
            island_max_size: 5,

            stall_speed_threshold: 0.002,
            stall_duration: 10.0,
            injected_force: 0.01,
        }
    }
}

impl SimConfig {
    /// Parse a (possibly partial) JSON configuration; missing keys take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.divisions < 1 {
            return Err(TectoError::InvalidDivisions(self.divisions));
        }
        let positive = [
            ("timestep", self.timestep),
            ("maxAngularSpeed", self.max_angular_speed),
            ("maxKineticEnergy", self.max_kinetic_energy),
            ("rasterBinsPerField", self.raster_bins_per_field),
            ("maxSubductionDist", self.max_subduction_dist),
            ("oceanicRidgeWidthKm", self.oceanic_ridge_width_km),
            ("oceanicFieldDensity", self.oceanic_field_density),
            ("continentalFieldDensity", self.continental_field_density),
            ("referenceFieldCount", self.reference_field_count),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(TectoError::InvalidConfig(format!("{name} must be positive, got {value}")));
            }
        }
        if !(0.0..=1.0).contains(&self.plate_division_threshold) {
            return Err(TectoError::InvalidConfig(format!(
                "plateDivisionThreshold must be within [0, 1], got {}",
                self.plate_division_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.continental_stretch_factor) {
            return Err(TectoError::InvalidConfig(format!(
                "continentalStretchFactor must be within [0, 1), got {}",
                self.continental_stretch_factor
            )));
        }
        if self.center_update_interval == 0 {
            return Err(TectoError::InvalidConfig("centerUpdateInterval must be at least 1".into()));
        }
        Ok(())
    }

    /// Maximum oceanic age used to normalise ridge elevation.
    pub fn max_age(&self) -> f64 {
        self.oceanic_ridge_width_km / crate::sphere::PLANET_RADIUS_KM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c = SimConfig::from_json(r#"{ "divisions": 8, "integration": "rk4" }"#).unwrap();
        assert_eq!(c.divisions, 8);
        assert_eq!(c.integration, Integration::Rk4);
        assert_eq!(c.timestep, SimConfig::default().timestep);
    }

    #[test]
    fn zero_divisions_rejected() {
        let err = SimConfig::from_json(r#"{ "divisions": 0 }"#).unwrap_err();
        assert!(matches!(err, TectoError::InvalidDivisions(0)));
    }

    #[test]
    fn negative_timestep_rejected() {
        let c = SimConfig { timestep: -1.0, ..SimConfig::default() };
        assert!(matches!(c.validate(), Err(TectoError::InvalidConfig(_))));
    }
}
