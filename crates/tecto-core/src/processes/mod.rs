//! Per-field geological processes.
//!
//! Each process is a small state machine living in an optional slot on a
//! [`Field`](crate::field::Field). Processes never reach into plates or the
//! grid themselves; the model gathers their inputs, calls `update`, and applies
//! what they report.

pub mod earthquake;
pub mod orogeny;
pub mod subduction;
pub mod volcanic_activity;
pub mod volcanic_eruption;

pub use earthquake::Earthquake;
pub use orogeny::Orogeny;
pub use subduction::{Subduction, SubductionState};
pub use volcanic_activity::{MagmaBlob, VolcanicActivity, VolcanicOutput};
pub use volcanic_eruption::VolcanicEruption;

/// Factor that keeps event rates per unit area independent of grid resolution.
pub fn event_scale(reference_field_count: f64, field_count: usize) -> f64 {
    reference_field_count / field_count.max(1) as f64
}
