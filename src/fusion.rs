// fusion.rs: owns the inertial preprocessor and the scalar filter
//
// Inertial samples drive predict at sensor rate; absolute fixes drive
// correct. The filter always blends on a fix, it is never overwritten with
// the measured speed.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::filters::ScalarFusionFilter;
use crate::inertial::{InertialPreprocessor, InertialStats, InertialUpdate};
use crate::types::{AbsoluteFix, GeoPosition, InertialCapability, InertialSample, SpeedEstimate};

/// What one absolute fix produced
#[derive(Clone, Debug, PartialEq)]
pub struct FixUpdate {
    pub timestamp: f64,
    pub measured_speed: f64,
    pub fused: SpeedEstimate,
    /// Inertially extrapolated speed at the end of the fix interval, i.e. the
    /// estimate just before correction. `None` without the inertial path.
    pub inertial_speed: Option<f64>,
    pub position: GeoPosition,
    pub distance_m: f64,
}

#[derive(Clone, Debug, Default)]
pub struct FusionStats {
    pub inertial: InertialStats,
    pub fixes: u64,
    pub malformed_fixes: u64,
}

pub struct FusionController {
    preprocessor: InertialPreprocessor,
    filter: ScalarFusionFilter,
    inertial_available: bool,
    motion_threshold_kmh: f64,

    distance_m: f64,
    last_position: Option<GeoPosition>,
    last_fix_ts: Option<f64>,
    fixes: u64,
    malformed_fixes: u64,
}

impl FusionController {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            preprocessor: InertialPreprocessor::new(config),
            filter: ScalarFusionFilter::new(
                config.process_noise,
                config.measurement_noise,
                config.prior_uncertainty,
            ),
            inertial_available: true,
            motion_threshold_kmh: config.motion_threshold_kmh,
            distance_m: 0.0,
            last_position: None,
            last_fix_ts: None,
            fixes: 0,
            malformed_fixes: 0,
        }
    }

    pub fn set_inertial_capability(&mut self, capability: InertialCapability) {
        self.inertial_available = capability == InertialCapability::Available;
    }

    /// Feed one inertial sample; runs predict when the sample yields a usable dt.
    pub fn on_inertial(&mut self, sample: &InertialSample) -> Option<InertialUpdate> {
        if !self.inertial_available {
            return None;
        }
        let update = self.preprocessor.process(sample)?;
        if let Some(delta_v) = update.delta_v {
            self.filter.predict(delta_v);
        }
        Some(update)
    }

    /// Feed one absolute fix; runs correct and accrues distance.
    pub fn on_fix(&mut self, fix: &AbsoluteFix) -> Result<FixUpdate, PipelineError> {
        if let Err(err) = self.validate_fix(fix) {
            self.malformed_fixes += 1;
            log::debug!("skipping fix: {}", err);
            return Err(err);
        }

        let measured_speed = fix.speed.max(0.0);
        let predicted = self.filter.speed();
        let fused = self.filter.correct(measured_speed);

        if let Some(prev) = self.last_position {
            if fused.value > self.motion_threshold_kmh {
                self.distance_m += prev.distance_to(&fix.position);
            }
        }
        self.last_position = Some(fix.position);
        self.last_fix_ts = Some(fix.timestamp);
        self.fixes += 1;

        Ok(FixUpdate {
            timestamp: fix.timestamp,
            measured_speed,
            fused,
            inertial_speed: self.inertial_available.then_some(predicted),
            position: fix.position,
            distance_m: self.distance_m,
        })
    }

    fn validate_fix(&self, fix: &AbsoluteFix) -> Result<(), PipelineError> {
        let finite = fix.timestamp.is_finite()
            && fix.speed.is_finite()
            && fix.position.latitude.is_finite()
            && fix.position.longitude.is_finite();
        if !finite {
            return Err(PipelineError::MalformedSample("non-finite fix".into()));
        }
        if let Some(prev) = self.last_fix_ts {
            if fix.timestamp <= prev {
                return Err(PipelineError::MalformedSample(format!(
                    "fix timestamp {:.3} does not advance past {:.3}",
                    fix.timestamp, prev
                )));
            }
        }
        Ok(())
    }

    pub fn reset_movement_detection(&mut self) {
        self.preprocessor.reset_movement_detection();
    }

    /// Called when a paused session resumes: no distance across the gap.
    pub fn on_resume(&mut self) {
        self.last_position = None;
        self.preprocessor.reset_movement_detection();
    }

    /// Back to the initial state for a new session
    pub fn reset(&mut self) {
        self.filter.reset(0.0);
        self.preprocessor.reset_movement_detection();
        self.distance_m = 0.0;
        self.last_position = None;
        self.last_fix_ts = None;
    }

    pub fn estimate(&self) -> SpeedEstimate {
        self.filter.estimate()
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    pub fn stats(&self) -> FusionStats {
        FusionStats {
            inertial: self.preprocessor.stats().clone(),
            fixes: self.fixes,
            malformed_fixes: self.malformed_fixes,
        }
    }
}
