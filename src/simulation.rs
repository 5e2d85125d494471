//! Synthetic sensor feeds for the demo binary.
//!
//! A deterministic straight-line drive: rest, constant acceleration up to
//! the top speed, cruise, hard braking to a stop, rest, then pulling away
//! at a walking-pace speed. Inertial samples are produced at 100 Hz in a
//! tilted device frame, absolute fixes at 1 Hz.

use geo::HaversineDestination;
use nalgebra::Rotation3;
use tokio::time::{sleep_until, Duration, Instant};

use crate::error::PipelineResult;
use crate::runtime::PipelineSender;
use crate::types::{AbsoluteFix, GeoPosition, InertialSample, Vec3, MS_TO_KMH, STANDARD_GRAVITY};

pub const INERTIAL_RATE_HZ: f64 = 100.0;
pub const FIX_PERIOD_SECS: f64 = 1.0;

#[derive(Clone, Debug)]
pub struct DriveProfile {
    pub start: GeoPosition,
    pub bearing_deg: f64,
    pub rest_secs: f64,
    pub acceleration_ms2: f64,
    pub top_speed_kmh: f64,
    pub cruise_secs: f64,
    pub braking_ms2: f64,
    /// Speed held after pulling away from the final stop; 0 ends at rest
    pub depart_kmh: f64,
    pub depart_hold_secs: f64,
    /// Device mounting angles (roll, pitch, yaw) in radians
    pub mount: (f64, f64, f64),
    /// Fix speed jitter amplitude in km/h
    pub fix_noise_kmh: f64,
}

impl Default for DriveProfile {
    fn default() -> Self {
        Self {
            start: GeoPosition::new(45.4642, 9.1900),
            bearing_deg: 30.0,
            rest_secs: 3.0,
            acceleration_ms2: 4.0,
            top_speed_kmh: 120.0,
            cruise_secs: 5.0,
            braking_ms2: 7.5,
            depart_kmh: 20.0,
            depart_hold_secs: 3.0,
            mount: (0.15, -0.35, 1.1),
            fix_noise_kmh: 0.4,
        }
    }
}

/// One step of either stream, in timestamp order
#[derive(Clone, Debug)]
pub enum SimulatedSample {
    Inertial(InertialSample),
    Fix(AbsoluteFix),
}

impl SimulatedSample {
    pub fn timestamp(&self) -> f64 {
        match self {
            SimulatedSample::Inertial(s) => s.timestamp,
            SimulatedSample::Fix(f) => f.timestamp,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FeedStats {
    pub inertial_sent: u64,
    pub inertial_dropped: u64,
    pub fixes_sent: u64,
    pub fixes_dropped: u64,
}

pub struct SimulatedDrive {
    profile: DriveProfile,
    rotation: Rotation3<f64>,
    // Phase boundaries in seconds from t0
    accel_end: f64,
    cruise_end: f64,
    brake_end: f64,
    rest_end: f64,
    depart_end: f64,
    total: f64,
}

impl SimulatedDrive {
    pub fn new(profile: DriveProfile) -> Self {
        let top = profile.top_speed_kmh / MS_TO_KMH;
        let accel_end = profile.rest_secs + top / profile.acceleration_ms2;
        let cruise_end = accel_end + profile.cruise_secs;
        let brake_end = cruise_end + top / profile.braking_ms2;
        let rest_end = brake_end + profile.rest_secs;
        let (depart_end, total) = if profile.depart_kmh > 0.0 {
            let depart_end = rest_end + profile.depart_kmh / MS_TO_KMH / profile.acceleration_ms2;
            (depart_end, depart_end + profile.depart_hold_secs)
        } else {
            (rest_end, rest_end)
        };
        let (roll, pitch, yaw) = profile.mount;
        Self {
            rotation: Rotation3::from_euler_angles(roll, pitch, yaw),
            accel_end,
            cruise_end,
            brake_end,
            rest_end,
            depart_end,
            total,
            profile,
        }
    }

    pub fn duration(&self) -> f64 {
        self.total
    }

    fn top_ms(&self) -> f64 {
        self.profile.top_speed_kmh / MS_TO_KMH
    }

    /// (speed m/s, longitudinal acceleration m/s², distance m) at `t`
    pub fn kinematics(&self, t: f64) -> (f64, f64, f64) {
        let p = &self.profile;
        let top = self.top_ms();
        let accel_dist = top * top / (2.0 * p.acceleration_ms2);
        let cruise_dist = top * p.cruise_secs;

        if t < p.rest_secs {
            (0.0, 0.0, 0.0)
        } else if t < self.accel_end {
            let dt = t - p.rest_secs;
            (p.acceleration_ms2 * dt, p.acceleration_ms2, 0.5 * p.acceleration_ms2 * dt * dt)
        } else if t < self.cruise_end {
            let dt = t - self.accel_end;
            (top, 0.0, accel_dist + top * dt)
        } else if t < self.brake_end {
            let dt = t - self.cruise_end;
            let v = top - p.braking_ms2 * dt;
            (v, -p.braking_ms2, accel_dist + cruise_dist + top * dt - 0.5 * p.braking_ms2 * dt * dt)
        } else {
            let stopped_at = accel_dist + cruise_dist + top * top / (2.0 * p.braking_ms2);
            let depart = p.depart_kmh / MS_TO_KMH;
            if t < self.rest_end || depart <= 0.0 {
                (0.0, 0.0, stopped_at)
            } else if t < self.depart_end {
                let dt = t - self.rest_end;
                (p.acceleration_ms2 * dt, p.acceleration_ms2, stopped_at + 0.5 * p.acceleration_ms2 * dt * dt)
            } else {
                let depart_dist = depart * depart / (2.0 * p.acceleration_ms2);
                (depart, 0.0, stopped_at + depart_dist + depart * (t - self.depart_end))
            }
        }
    }

    pub fn position_at(&self, t: f64) -> GeoPosition {
        let (_, _, distance) = self.kinematics(t);
        GeoPosition::from_point(
            self.profile
                .start
                .to_point()
                .haversine_destination(self.profile.bearing_deg, distance),
        )
    }

    pub fn inertial_sample(&self, t: f64) -> InertialSample {
        let (_, accel, _) = self.kinematics(t);
        // Vehicle frame: x forward, z up. Road and engine vibration on top.
        let vibration = Vec3::new(
            0.01 * (t * 61.0).sin(),
            0.01 * (t * 47.0).cos(),
            0.02 * (t * 89.0).sin(),
        );
        let user = Vec3::new(accel / STANDARD_GRAVITY, 0.0, 0.0) + vibration;
        let gravity = Vec3::new(0.0, 0.0, -1.0);
        InertialSample::new(t, self.rotation * user, self.rotation * gravity)
    }

    pub fn fix(&self, t: f64) -> AbsoluteFix {
        let (speed, _, _) = self.kinematics(t);
        let jitter = if speed > 0.0 { self.profile.fix_noise_kmh * (t * 1.7).sin() } else { 0.0 };
        AbsoluteFix::new(t, (speed * MS_TO_KMH + jitter).max(0.0), self.position_at(t))
    }

    /// Both streams merged in timestamp order, relative to t0 = 0
    pub fn samples(&self) -> Vec<SimulatedSample> {
        let inertial_count = (self.total * INERTIAL_RATE_HZ).ceil() as usize;
        let fix_count = (self.total / FIX_PERIOD_SECS).ceil() as usize;

        let mut samples: Vec<SimulatedSample> = (0..inertial_count)
            .map(|i| SimulatedSample::Inertial(self.inertial_sample(i as f64 / INERTIAL_RATE_HZ)))
            .chain((0..=fix_count).map(|i| SimulatedSample::Fix(self.fix(i as f64 * FIX_PERIOD_SECS))))
            .collect();
        samples.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
        samples
    }
}

/// Push the drive into the pipeline at `speedup` × real time
pub async fn feed(drive: &SimulatedDrive, sender: &PipelineSender, speedup: f64) -> PipelineResult<FeedStats> {
    let mut stats = FeedStats::default();
    let started = Instant::now();
    let speedup = speedup.max(1e-3);

    for sample in drive.samples() {
        let due = started + Duration::from_secs_f64(sample.timestamp() / speedup);
        sleep_until(due).await;

        match sample {
            SimulatedSample::Inertial(s) => {
                if sender.push_inertial(s)? {
                    stats.inertial_sent += 1;
                } else {
                    stats.inertial_dropped += 1;
                }
            }
            SimulatedSample::Fix(f) => {
                if sender.push_fix(f)? {
                    stats.fixes_sent += 1;
                } else {
                    stats.fixes_dropped += 1;
                }
            }
        }
    }
    if stats.inertial_dropped > 0 {
        log::warn!("{} inertial samples dropped on a full channel", stats.inertial_dropped);
    }
    Ok(stats)
}
