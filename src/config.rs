use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // ── Scalar filter ──
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub prior_uncertainty: f64,

    // ── Inertial preprocessing ──
    pub gravity_min_magnitude: f64,
    pub movement_threshold_g: f64,
    pub onset_sample_count: u32,
    pub inertial_sample_period: f64,
    pub max_inertial_dt: f64,
    pub gravity: f64,

    // ── Fusion / distance ──
    pub motion_threshold_kmh: f64,

    // ── Milestones ──
    pub zero_to_hundred_kmh: f64,
    pub zero_to_two_hundred_kmh: f64,
    pub braking_trigger_g: f64,
    pub braking_band_low_kmh: f64,
    pub braking_band_high_kmh: f64,
    pub braking_stop_kmh: f64,
    /// Highest speed at which the first fix of a cycle may arm a run
    pub rolling_arm_max_kmh: f64,
    /// An onset-armed run that no fix confirms within this many seconds is dropped
    pub onset_arm_timeout_secs: f64,

    // ── Session ──
    pub min_saved_distance_km: f64,
    pub min_saved_speed_kmh: f64,
    /// g-force readings at or below this are not considered for the peak
    pub peak_g_floor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.05,
            measurement_noise: 3.0,
            prior_uncertainty: 1.0,
            gravity_min_magnitude: 0.01,
            movement_threshold_g: 0.15,
            onset_sample_count: 6,
            inertial_sample_period: 0.01,
            max_inertial_dt: 0.1,
            gravity: 9.81,
            motion_threshold_kmh: 2.0,
            zero_to_hundred_kmh: 100.0,
            zero_to_two_hundred_kmh: 200.0,
            braking_trigger_g: 0.5,
            braking_band_low_kmh: 97.0,
            braking_band_high_kmh: 103.0,
            braking_stop_kmh: 2.0,
            rolling_arm_max_kmh: 20.0,
            onset_arm_timeout_secs: 3.0,
            min_saved_distance_km: 0.1,
            min_saved_speed_kmh: 5.0,
            peak_g_floor: 0.1,
        }
    }
}

impl PipelineConfig {
    /// Load overrides from a JSON file; missing fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let positive = [
            ("process_noise", self.process_noise),
            ("measurement_noise", self.measurement_noise),
            ("prior_uncertainty", self.prior_uncertainty),
            ("gravity_min_magnitude", self.gravity_min_magnitude),
            ("movement_threshold_g", self.movement_threshold_g),
            ("inertial_sample_period", self.inertial_sample_period),
            ("max_inertial_dt", self.max_inertial_dt),
            ("gravity", self.gravity),
            ("motion_threshold_kmh", self.motion_threshold_kmh),
            ("zero_to_hundred_kmh", self.zero_to_hundred_kmh),
            ("zero_to_two_hundred_kmh", self.zero_to_two_hundred_kmh),
            ("braking_trigger_g", self.braking_trigger_g),
            ("braking_stop_kmh", self.braking_stop_kmh),
            ("rolling_arm_max_kmh", self.rolling_arm_max_kmh),
            ("onset_arm_timeout_secs", self.onset_arm_timeout_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(PipelineError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.onset_sample_count == 0 {
            return Err(PipelineError::Config("onset_sample_count must be at least 1".into()));
        }
        if self.braking_band_low_kmh > self.braking_band_high_kmh {
            return Err(PipelineError::Config("braking band is inverted".into()));
        }
        if self.motion_threshold_kmh >= self.zero_to_hundred_kmh {
            return Err(PipelineError::Config(
                "motion_threshold_kmh must be below zero_to_hundred_kmh".into(),
            ));
        }
        Ok(())
    }

    /// Braking trigger in m/s²
    pub fn braking_trigger_ms2(&self) -> f64 {
        self.braking_trigger_g * self.gravity
    }
}
