//! Linear algebra helpers for the inertial path
//!
//! Everything here works in the device frame. Vectors are in g unless a
//! caller converts them with [`STANDARD_GRAVITY`].

use nalgebra::Vector3;

pub type Vec3 = Vector3<f64>;

/// Standard gravity (m/s² per g)
pub const STANDARD_GRAVITY: f64 = 9.81;

/// m/s → km/h
pub const MS_TO_KMH: f64 = 3.6;

/// Remove the component of `v` along `unit_normal`, leaving the part that lies
/// in the plane orthogonal to it. `unit_normal` must already be normalized.
pub fn project_onto_plane(v: &Vec3, unit_normal: &Vec3) -> Vec3 {
    v - unit_normal * v.dot(unit_normal)
}

/// Normalize `v`, or `None` when its magnitude is at or below `min_norm`.
pub fn try_unit(v: &Vec3, min_norm: f64) -> Option<Vec3> {
    let norm = v.norm();
    if norm > min_norm && norm.is_finite() {
        Some(v / norm)
    } else {
        None
    }
}
