use thiserror::Error;

/// Errors surfaced by the simulation engine.
///
/// Inside the model only construction-time and deserialization-time problems
/// are errors; absent crust, missing plates under a point and similar runtime
/// cases are `Option`s. The command host turns a missed point into
/// [`TectoError::NoPlateAt`].
#[derive(Debug, Error)]
pub enum TectoError {
    #[error("grid divisions must be at least 1, got {0}")]
    InvalidDivisions(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid seed image: {0}")]
    InvalidSeedImage(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot was taken on a grid with {found} divisions, model grid has {expected}")]
    SnapshotGridMismatch { expected: u32, found: u32 },

    #[error("unknown plate {0}")]
    UnknownPlate(u32),

    #[error("no plate at ({x:.3}, {y:.3}, {z:.3})")]
    NoPlateAt { x: f64, y: f64, z: f64 },

    #[error("no model is loaded")]
    NoModel,

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TectoError>;
