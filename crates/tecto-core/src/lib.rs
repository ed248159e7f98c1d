//! Tectonic plate simulation on a geodesic sphere.
//!
//! Rigid plates made of grid fields rotate under hotspot torque, collide,
//! subduct and grow at divergent boundaries while each field tracks its own
//! crust and geological processes. [`Model`] owns the whole state and advances
//! it one step at a time; [`host::Session`] wraps it with the command surface
//! a front end drives.

pub mod config;
pub mod crust;
pub mod error;
pub mod fbm;
pub mod field;
pub mod grid;
pub mod host;
pub mod integrators;
pub mod model;
pub mod plate;
pub mod processes;
pub mod sphere;

pub use config::{Integration, SimConfig, SpatialIndexMode};
pub use error::{Result, TectoError};
pub use grid::{FieldId, GeodesicGrid};
pub use model::presets::{PlateInit, Preset};
pub use model::{Model, SeedImage, StepOutcome};
pub use plate::{Plate, PlateId};
pub use sphere::Vec3;
