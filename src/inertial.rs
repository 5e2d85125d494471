// inertial.rs: raw motion samples in, signed forward acceleration out
//
// The forward axis is not known from device orientation. It is learned once
// per measurement cycle: after a short run of consecutive samples with
// horizontal intensity above the movement threshold, the horizontal
// acceleration direction at that instant becomes the locked forward axis.

use crate::config::PipelineConfig;
use crate::types::{
    project_onto_plane, try_unit, ForwardAccelerationSignal, InertialSample, MotionOnsetEvent,
    Vec3, MS_TO_KMH,
};

/// Result of one accepted inertial sample
#[derive(Clone, Debug, PartialEq)]
pub struct InertialUpdate {
    pub forward: ForwardAccelerationSignal,
    /// km/h increment for the filter's predict step; `None` when dt was
    /// unusable (first sample of a cycle, non-positive, or above the ceiling)
    pub delta_v: Option<f64>,
    /// Set only on the sample that locked the forward direction
    pub onset: Option<MotionOnsetEvent>,
    /// Horizontal intensity in m/s²
    pub intensity: f64,
    /// Magnitude of user acceleration in g
    pub g_force: f64,
}

#[derive(Clone, Debug, Default)]
pub struct InertialStats {
    pub accepted: u64,
    pub rejected: u64,
    pub dt_anomalies: u64,
}

pub struct InertialPreprocessor {
    gravity_min_magnitude: f64,
    movement_threshold: f64,
    onset_sample_count: u32,
    sample_period: f64,
    max_dt: f64,
    gravity: f64,

    locked_direction: Option<Vec3>,
    sustained_count: u32,
    last_timestamp: Option<f64>,
    onset: Option<MotionOnsetEvent>,
    stats: InertialStats,
}

impl InertialPreprocessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            gravity_min_magnitude: config.gravity_min_magnitude,
            movement_threshold: config.movement_threshold_g,
            onset_sample_count: config.onset_sample_count,
            sample_period: config.inertial_sample_period,
            max_dt: config.max_inertial_dt,
            gravity: config.gravity,
            locked_direction: None,
            sustained_count: 0,
            last_timestamp: None,
            onset: None,
            stats: InertialStats::default(),
        }
    }

    /// Process one sample. Returns `None` when the sample is rejected, in
    /// which case no state has changed.
    pub fn process(&mut self, sample: &InertialSample) -> Option<InertialUpdate> {
        let gravity_unit = match try_unit(&sample.gravity_vector(), self.gravity_min_magnitude) {
            Some(g) => g,
            None => {
                self.stats.rejected += 1;
                log::trace!("inertial sample at {:.3} rejected: no gravity reference", sample.timestamp);
                return None;
            }
        };
        let user = sample.user_vector();
        if !(user.iter().all(|c| c.is_finite()) && sample.timestamp.is_finite()) {
            self.stats.rejected += 1;
            return None;
        }

        let horizontal = project_onto_plane(&user, &gravity_unit);
        let intensity = horizontal.norm();

        let mut onset = None;
        if self.locked_direction.is_none() {
            if intensity > self.movement_threshold {
                self.sustained_count += 1;
                if self.sustained_count >= self.onset_sample_count {
                    self.locked_direction = Some(horizontal / intensity);
                    let backtrack = self.sustained_count as f64 * self.sample_period;
                    let event = MotionOnsetEvent {
                        detected_at: sample.timestamp,
                        backdated_to: sample.timestamp - backtrack,
                    };
                    log::debug!(
                        "motion onset detected at {:.3}, backdated to {:.3}",
                        event.detected_at,
                        event.backdated_to
                    );
                    self.onset = Some(event);
                    onset = Some(event);
                }
            } else {
                self.sustained_count = 0;
            }
        }

        let forward_ms2 = match self.locked_direction {
            Some(dir) => horizontal.dot(&dir) * self.gravity,
            None => 0.0,
        };

        let delta_v = match self.last_timestamp {
            Some(prev) => {
                let dt = sample.timestamp - prev;
                if dt > 0.0 && dt < self.max_dt {
                    Some(forward_ms2 * dt * MS_TO_KMH)
                } else {
                    self.stats.dt_anomalies += 1;
                    log::trace!("inertial dt {:.4}s outside (0, {}), skipping predict", dt, self.max_dt);
                    None
                }
            }
            None => None,
        };
        // Keep the newest timestamp so one late sample cannot rewind the clock
        if self.last_timestamp.map_or(true, |prev| sample.timestamp > prev) {
            self.last_timestamp = Some(sample.timestamp);
        }

        self.stats.accepted += 1;
        Some(InertialUpdate {
            forward: ForwardAccelerationSignal { magnitude: forward_ms2, timestamp: sample.timestamp },
            delta_v,
            onset,
            intensity: intensity * self.gravity,
            g_force: user.norm(),
        })
    }

    /// Forget the forward direction and debounce state so the next cycle
    /// re-acquires direction from scratch.
    pub fn reset_movement_detection(&mut self) {
        self.locked_direction = None;
        self.sustained_count = 0;
        self.last_timestamp = None;
        self.onset = None;
    }

    pub fn is_locked(&self) -> bool {
        self.locked_direction.is_some()
    }

    pub fn locked_direction(&self) -> Option<Vec3> {
        self.locked_direction
    }

    pub fn sustained_count(&self) -> u32 {
        self.sustained_count
    }

    /// Onset of the current cycle, if one has fired
    pub fn motion_onset(&self) -> Option<MotionOnsetEvent> {
        self.onset
    }

    pub fn stats(&self) -> &InertialStats {
        &self.stats
    }
}
