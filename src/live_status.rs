use serde::{Deserialize, Serialize};
use std::fs;

use crate::runtime::{current_timestamp, PipelineSnapshot};
use crate::session::{AcquisitionStatus, SessionState};

/// Status file rewritten periodically by the demo binary
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub state: SessionState,
    pub acquisition: AcquisitionStatus,
    // Fused speed
    pub speed_kmh: f64,
    pub speed_uncertainty: f64,
    // Session
    pub max_speed_kmh: f64,
    pub distance_km: f64,
    pub elapsed_secs: f64,
    pub peak_g_force: f64,
    pub best_zero_to_hundred: Option<f64>,
    pub best_zero_to_two_hundred: Option<f64>,
    pub braking_distance_m: Option<f64>,
    pub running_zero_to_hundred: Option<f64>,
    // Input health
    pub inertial_samples: u64,
    pub inertial_rejected: u64,
    pub dt_anomalies: u64,
    pub fixes: u64,
    pub malformed_fixes: u64,
    pub degraded: bool,
    pub last_error: Option<String>,
}

impl LiveStatus {
    pub fn from_snapshot(snapshot: &PipelineSnapshot, uptime_seconds: u64) -> Self {
        let metrics = &snapshot.metrics;
        Self {
            timestamp: current_timestamp(),
            uptime_seconds,
            state: snapshot.state,
            acquisition: snapshot.acquisition,
            speed_kmh: snapshot.estimate.value,
            speed_uncertainty: snapshot.estimate.uncertainty,
            max_speed_kmh: metrics.max_speed,
            distance_km: metrics.distance_km,
            elapsed_secs: metrics.elapsed_secs,
            peak_g_force: metrics.peak_g_force,
            best_zero_to_hundred: metrics.best_zero_to_hundred,
            best_zero_to_two_hundred: metrics.best_zero_to_two_hundred,
            braking_distance_m: metrics.braking_distance_m,
            running_zero_to_hundred: metrics.running_zero_to_hundred,
            inertial_samples: snapshot.inertial_accepted,
            inertial_rejected: snapshot.inertial_rejected,
            dt_anomalies: snapshot.dt_anomalies,
            fixes: snapshot.fixes,
            malformed_fixes: snapshot.malformed_fixes,
            degraded: snapshot.degraded,
            last_error: snapshot.last_error.clone(),
        }
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
