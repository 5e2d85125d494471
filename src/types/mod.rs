pub mod linalg;

pub use linalg::*;

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

/// One delivery from the motion sensor. Both vectors are in g, device frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InertialSample {
    pub timestamp: f64,
    /// Acceleration with gravity already removed
    pub user_acceleration: (f64, f64, f64),
    /// Gravity reference, not necessarily unit length
    pub gravity: (f64, f64, f64),
}

impl InertialSample {
    pub fn new(timestamp: f64, user_acceleration: Vec3, gravity: Vec3) -> Self {
        Self {
            timestamp,
            user_acceleration: (user_acceleration.x, user_acceleration.y, user_acceleration.z),
            gravity: (gravity.x, gravity.y, gravity.z),
        }
    }

    pub fn user_vector(&self) -> Vec3 {
        Vec3::new(self.user_acceleration.0, self.user_acceleration.1, self.user_acceleration.2)
    }

    pub fn gravity_vector(&self) -> Vec3 {
        Vec3::new(self.gravity.0, self.gravity.1, self.gravity.2)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn to_point(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    pub fn from_point(point: Point<f64>) -> Self {
        Self { latitude: point.y(), longitude: point.x() }
    }

    /// Great-circle distance in meters
    pub fn distance_to(&self, other: &GeoPosition) -> f64 {
        self.to_point().haversine_distance(&other.to_point())
    }
}

/// One fix from the absolute-position source. `timestamp` is the source clock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AbsoluteFix {
    pub timestamp: f64,
    /// km/h; negative values mean "speed invalid" and are treated as 0
    pub speed: f64,
    pub position: GeoPosition,
}

impl AbsoluteFix {
    pub fn new(timestamp: f64, speed: f64, position: GeoPosition) -> Self {
        Self { timestamp, speed, position }
    }
}

/// Fused speed (km/h) and its variance
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedEstimate {
    pub value: f64,
    pub uncertainty: f64,
}

/// Signed longitudinal acceleration in m/s² along the locked forward direction
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardAccelerationSignal {
    pub magnitude: f64,
    pub timestamp: f64,
}

/// Sustained movement detected at `detected_at`, estimated to have begun at
/// `backdated_to`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionOnsetEvent {
    pub detected_at: f64,
    pub backdated_to: f64,
}

/// External authorization state of the absolute-position source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationAuthorization {
    NotDetermined,
    Denied,
    Restricted,
    Authorized,
}

/// Inertial capability, queried once when acquisition starts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InertialCapability {
    Available,
    Unavailable,
}
