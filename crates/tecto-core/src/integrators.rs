//! Rigid-body integrators for plate orientation and angular velocity.
//!
//! Every scheme is split into a part that runs before collisions and geology
//! (`before_interactions`) and a part that runs after them
//! (`after_interactions`); only Verlet does work in the second half.

use nalgebra::UnitQuaternion;

use crate::config::{Integration, SimConfig};
use crate::grid::GeodesicGrid;
use crate::plate::Plate;
use crate::sphere::Vec3;

/// Rotate `q` by angular velocity `omega` over `dt`.
pub fn rotate(q: &UnitQuaternion<f64>, omega: &Vec3, dt: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(omega * dt) * q
}

pub fn before_interactions(scheme: Integration, plates: &mut [Plate], grid: &GeodesicGrid, config: &SimConfig, dt: f64) {
    for plate in plates.iter_mut() {
        match scheme {
            Integration::Euler => euler_step(plate, grid, config, dt),
            Integration::Verlet => verlet_drift(plate, dt),
            Integration::Rk4 => rk4_step(plate, grid, config, dt),
        }
    }
}

pub fn after_interactions(scheme: Integration, plates: &mut [Plate], grid: &GeodesicGrid, config: &SimConfig, dt: f64) {
    if scheme != Integration::Verlet {
        return;
    }
    for plate in plates.iter_mut() {
        verlet_kick(plate, grid, config, dt);
    }
}

/// Semi-implicit Euler: velocity first, then rotation from the new velocity.
fn euler_step(plate: &mut Plate, grid: &GeodesicGrid, config: &SimConfig, dt: f64) {
    let a = plate.acceleration(grid, config, &plate.quaternion, &plate.angular_velocity);
    plate.angular_acceleration = a;
    plate.angular_velocity += a * dt;
    plate.quaternion = rotate(&plate.quaternion, &plate.angular_velocity, dt);
}

/// Half kick with the cached acceleration, then a full rotation step.
fn verlet_drift(plate: &mut Plate, dt: f64) {
    plate.angular_velocity += plate.angular_acceleration * (dt * 0.5);
    plate.quaternion = rotate(&plate.quaternion, &plate.angular_velocity, dt);
}

/// Re-evaluate acceleration on the updated plate and apply the second half kick.
fn verlet_kick(plate: &mut Plate, grid: &GeodesicGrid, config: &SimConfig, dt: f64) {
    let a = plate.acceleration(grid, config, &plate.quaternion, &plate.angular_velocity);
    plate.angular_acceleration = a;
    plate.angular_velocity += a * (dt * 0.5);
}

fn rk4_step(plate: &mut Plate, grid: &GeodesicGrid, config: &SimConfig, dt: f64) {
    let q0 = plate.quaternion;
    let w0 = plate.angular_velocity;
    let rotate_stage = |w: &Vec3, h: f64| if config.rk4_rotation { rotate(&q0, w, h) } else { q0 };

    let w1 = w0;
    let a1 = plate.acceleration(grid, config, &q0, &w1);

    let w2 = w0 + a1 * (dt * 0.5);
    let a2 = plate.acceleration(grid, config, &rotate_stage(&w1, dt * 0.5), &w2);

    let w3 = w0 + a2 * (dt * 0.5);
    let a3 = plate.acceleration(grid, config, &rotate_stage(&w2, dt * 0.5), &w3);

    let w4 = w0 + a3 * dt;
    let a4 = plate.acceleration(grid, config, &rotate_stage(&w3, dt), &w4);

    let a = (a1 + a2 * 2.0 + a3 * 2.0 + a4) / 6.0;
    plate.angular_acceleration = a;
    plate.angular_velocity = w0 + a * dt;
    plate.quaternion = if config.rk4_rotation {
        let w = (w1 + w2 * 2.0 + w3 * 2.0 + w4) / 6.0;
        rotate(&q0, &w, dt)
    } else {
        rotate(&q0, &plate.angular_velocity, dt)
    };
}
