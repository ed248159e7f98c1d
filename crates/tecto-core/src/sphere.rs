//! Spherical geometry utilities for the plate simulation.
//! All operations on the unit sphere (z-up) using f64 precision.

use nalgebra::Vector3;
use rand::Rng;

/// A point or direction in model space.
pub type Vec3 = Vector3<f64>;

/// Planet radius used to convert angular distances into kilometres.
pub const PLANET_RADIUS_KM: f64 = 6400.0;

/// Unit vector for a latitude / longitude pair given in degrees.
pub fn from_latlon(lat_deg: f64, lon_deg: f64) -> Vec3 {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    Vec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
}

/// Latitude and longitude (degrees) of a point. The point need not be normalized.
pub fn to_latlon(p: &Vec3) -> (f64, f64) {
    let n = p.normalize();
    let lat = n.z.clamp(-1.0, 1.0).asin().to_degrees();
    let lon = n.y.atan2(n.x).to_degrees();
    (lat, lon)
}

/// Great-circle distance between two unit vectors in radians.
pub fn great_circle_distance_rad(a: &Vec3, b: &Vec3) -> f64 {
    a.dot(b).clamp(-1.0, 1.0).acos()
}

/// Interpolate along a great circle arc.
/// t=0 returns a, t=1 returns b.
pub fn slerp(a: &Vec3, b: &Vec3, t: f64) -> Vec3 {
    let omega = great_circle_distance_rad(a, b);
    if omega.abs() < 1e-10 {
        return *a;
    }
    let sin_omega = omega.sin();
    let fa = ((1.0 - t) * omega).sin() / sin_omega;
    let fb = (t * omega).sin() / sin_omega;
    a * fa + b * fb
}

/// Generate N evenly-spaced points on a great circle arc from a to b.
pub fn great_circle_arc_points(a: &Vec3, b: &Vec3, n: usize) -> Vec<Vec3> {
    (0..n).map(|i| slerp(a, b, i as f64 / (n - 1).max(1) as f64)).collect()
}

/// Component of `v` tangent to the sphere at unit point `p`.
pub fn tangent_component(p: &Vec3, v: &Vec3) -> Vec3 {
    v - p * p.dot(v)
}

/// Angle between two vectors in radians; zero if either is degenerate.
pub fn angle_between(a: &Vec3, b: &Vec3) -> f64 {
    let la = a.norm();
    let lb = b.norm();
    if la < 1e-12 || lb < 1e-12 {
        return 0.0;
    }
    (a.dot(b) / (la * lb)).clamp(-1.0, 1.0).acos()
}

/// Uniform random point on the unit sphere.
pub fn random_sphere_point<R: Rng>(rng: &mut R) -> Vec3 {
    let z: f64 = rng.gen_range(-1.0_f64..=1.0_f64);
    let theta: f64 = rng.gen_range(0.0_f64..std::f64::consts::TAU);
    let r = (1.0_f64 - z * z).max(0.0_f64).sqrt();
    Vec3::new(r * theta.cos(), r * theta.sin(), z)
}

/// Random unit vector tangent to the sphere at `p`.
pub fn random_tangent<R: Rng>(p: &Vec3, rng: &mut R) -> Vec3 {
    let arbitrary = if p.z.abs() < 0.9 {
        Vec3::new(0.0, 0.0, 1.0)
    } else {
        Vec3::new(1.0, 0.0, 0.0)
    };
    let t0 = p.cross(&arbitrary).normalize();
    let t1 = p.cross(&t0).normalize();
    let azimuth: f64 = rng.gen_range(0.0_f64..std::f64::consts::TAU);
    t0 * azimuth.cos() + t1 * azimuth.sin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn latlon_roundtrip() {
        let pairs = [(0.0, 0.0), (45.0, 90.0), (-60.0, -120.0), (89.0, 179.0)];
        for (lat, lon) in pairs {
            let v = from_latlon(lat, lon);
            let (lat2, lon2) = to_latlon(&v);
            assert!((lat - lat2).abs() < 1e-9, "lat mismatch: {lat} vs {lat2}");
            assert!((lon - lon2).abs() < 1e-9, "lon mismatch: {lon} vs {lon2}");
        }
    }

    #[test]
    fn great_circle_distance_poles() {
        let d = great_circle_distance_rad(&from_latlon(90.0, 0.0), &from_latlon(-90.0, 0.0));
        assert_abs_diff_eq!(d, std::f64::consts::PI, epsilon = 1e-9);
    }

    #[test]
    fn slerp_endpoints_and_midpoint() {
        let a = from_latlon(0.0, 0.0);
        let b = from_latlon(0.0, 90.0);
        assert_abs_diff_eq!(slerp(&a, &b, 0.0).x, a.x, epsilon = 1e-9);
        assert_abs_diff_eq!(slerp(&a, &b, 1.0).y, b.y, epsilon = 1e-9);
        let mid = slerp(&a, &b, 0.5);
        assert_abs_diff_eq!(mid.norm(), 1.0, epsilon = 1e-12);
        let (_, lon) = to_latlon(&mid);
        assert_abs_diff_eq!(lon, 45.0, epsilon = 1e-9);
    }

    #[test]
    fn arc_points_are_evenly_spaced() {
        let a = from_latlon(10.0, 0.0);
        let b = from_latlon(10.0, 60.0);
        let pts = great_circle_arc_points(&a, &b, 5);
        let steps: Vec<f64> = pts.windows(2).map(|w| great_circle_distance_rad(&w[0], &w[1])).collect();
        for s in &steps {
            assert_abs_diff_eq!(*s, steps[0], epsilon = 1e-9);
        }
    }

    #[test]
    fn random_tangent_is_orthogonal() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..20 {
            let p = random_sphere_point(&mut rng);
            let t = random_tangent(&p, &mut rng);
            assert_abs_diff_eq!(p.dot(&t), 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(t.norm(), 1.0, epsilon = 1e-9);
        }
    }
}
