use crate::types::SpeedEstimate;

pub const DEFAULT_PROCESS_NOISE: f64 = 0.05;
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 3.0;
pub const PRIOR_UNCERTAINTY: f64 = 1.0;

/// One-state Kalman filter over speed (km/h).
///
/// `predict` integrates an inertial velocity increment and accrues process
/// noise; `correct` blends in an absolute speed measurement.
#[derive(Clone, Debug)]
pub struct ScalarFusionFilter {
    speed: f64,
    p: f64,
    q: f64,
    r: f64,
    prior: f64,
}

impl ScalarFusionFilter {
    pub fn new(process_noise: f64, measurement_noise: f64, prior_uncertainty: f64) -> Self {
        Self {
            speed: 0.0,
            p: prior_uncertainty,
            q: process_noise,
            r: measurement_noise,
            prior: prior_uncertainty,
        }
    }

    pub fn predict(&mut self, delta_v: f64) -> SpeedEstimate {
        self.speed += delta_v;
        self.p += self.q;

        if self.speed < 0.0 {
            self.speed = 0.0;
        }
        self.estimate()
    }

    pub fn correct(&mut self, measurement: f64) -> SpeedEstimate {
        let k = self.p / (self.p + self.r);

        self.speed += k * (measurement - self.speed);
        self.p *= 1.0 - k;

        self.estimate()
    }

    pub fn reset(&mut self, to: f64) {
        self.speed = to.max(0.0);
        self.p = self.prior;
    }

    pub fn estimate(&self) -> SpeedEstimate {
        SpeedEstimate { value: self.speed, uncertainty: self.p }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }
}

impl Default for ScalarFusionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_NOISE, DEFAULT_MEASUREMENT_NOISE, PRIOR_UNCERTAINTY)
    }
}
