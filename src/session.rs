use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::fusion::{FusionController, FusionStats};
use crate::milestones::{MilestoneEvent, MilestoneKind, MilestoneTimingEngine};
use crate::storage::{SessionRecord, SessionStore};
use crate::types::{AbsoluteFix, InertialCapability, InertialSample, LocationAuthorization, SpeedEstimate};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session, sensors not consumed
    Idle,
    /// Consuming samples, clock running
    Running,
    /// Samples dropped, clock frozen, windows cleared
    Paused,
}

/// Acquisition status reported upward instead of faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionStatus {
    Inactive,
    Active,
    /// Absolute source running without the inertial assist
    InertialUnavailable,
    /// Position source unusable; acquisition never started
    Disabled,
}

/// Snapshot published to collaborators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub current_speed: f64,
    pub max_speed: f64,
    pub distance_km: f64,
    pub elapsed_secs: f64,
    pub peak_g_force: f64,
    pub best_zero_to_hundred: Option<f64>,
    pub best_zero_to_two_hundred: Option<f64>,
    pub braking_distance_m: Option<f64>,
    /// Live timers while a window is armed
    pub running_zero_to_hundred: Option<f64>,
    pub running_zero_to_two_hundred: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    NotStarted,
    TooShort,
    StoreFailed,
}

/// Result of `stop`: the saved/discarded signal for the persistence side
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Saved(SessionRecord),
    Discarded { reason: DiscardReason, metrics: SessionMetrics },
}

impl StopOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, StopOutcome::Saved(_))
    }
}

/// Orchestrates one session: lifecycle, running maxima, and the hand-off to
/// the injected store.
///
/// Clock arguments (`now`) are wall seconds; sample timestamps stay on their
/// own source clocks.
pub struct SessionAggregator<S: SessionStore> {
    config: PipelineConfig,
    fusion: FusionController,
    milestones: MilestoneTimingEngine,
    store: S,

    state: SessionState,
    acquisition: AcquisitionStatus,
    last_error: Option<PipelineError>,

    started_at: Option<f64>,
    running_since: Option<f64>,
    elapsed_secs: f64,

    current_speed: f64,
    max_speed: f64,
    peak_g_force: f64,
    sensor_clock: Option<f64>,
}

impl<S: SessionStore> SessionAggregator<S> {
    pub fn new(config: PipelineConfig, store: S) -> Self {
        Self {
            fusion: FusionController::new(&config),
            milestones: MilestoneTimingEngine::new(&config),
            config,
            store,
            state: SessionState::Idle,
            acquisition: AcquisitionStatus::Inactive,
            last_error: None,
            started_at: None,
            running_since: None,
            elapsed_secs: 0.0,
            current_speed: 0.0,
            max_speed: 0.0,
            peak_g_force: 0.0,
            sensor_clock: None,
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Begin (or continue) a session. Does not reset an already-running clock.
    pub fn start(
        &mut self,
        now: f64,
        authorization: LocationAuthorization,
        capability: InertialCapability,
    ) -> PipelineResult<()> {
        let denied = match authorization {
            LocationAuthorization::Authorized => None,
            LocationAuthorization::Denied => Some(PipelineError::PermissionDenied),
            LocationAuthorization::Restricted => Some(PipelineError::PermissionRestricted),
            LocationAuthorization::NotDetermined => Some(PipelineError::PermissionNotDetermined),
        };
        if let Some(err) = denied {
            log::warn!("not starting acquisition: {}", err);
            self.acquisition = AcquisitionStatus::Disabled;
            self.last_error = Some(err.clone());
            return Err(err);
        }

        match self.state {
            SessionState::Running => {
                log::debug!("start while running, clock untouched");
                Ok(())
            }
            SessionState::Paused => self.resume(now),
            SessionState::Idle => {
                self.fusion.reset();
                self.milestones.disarm_all();
                self.last_error = None;
                self.fusion.set_inertial_capability(capability);
                self.acquisition = match capability {
                    InertialCapability::Available => AcquisitionStatus::Active,
                    InertialCapability::Unavailable => {
                        log::warn!("{}", PipelineError::SensorUnavailable);
                        self.last_error = Some(PipelineError::SensorUnavailable);
                        AcquisitionStatus::InertialUnavailable
                    }
                };
                self.started_at = Some(now);
                self.running_since = Some(now);
                self.state = SessionState::Running;
                log::info!("session started ({:?})", self.acquisition);
                Ok(())
            }
        }
    }

    pub fn pause(&mut self, now: f64) -> PipelineResult<()> {
        if self.state != SessionState::Running {
            return Err(PipelineError::InvalidTransition(format!("pause while {:?}", self.state)));
        }
        // Stop consuming first, then clear window state
        self.state = SessionState::Paused;
        self.accrue(now);
        self.running_since = None;
        self.milestones.disarm_all();
        self.fusion.reset_movement_detection();
        log::info!("session paused at {:.1}s", self.elapsed_secs);
        Ok(())
    }

    pub fn resume(&mut self, now: f64) -> PipelineResult<()> {
        if self.state != SessionState::Paused {
            return Err(PipelineError::InvalidTransition(format!("resume while {:?}", self.state)));
        }
        self.milestones.disarm_all();
        self.fusion.on_resume();
        self.running_since = Some(now);
        self.state = SessionState::Running;
        log::info!("session resumed");
        Ok(())
    }

    /// Finalize; saves through the store when the session is valid. All
    /// state is reset afterwards either way.
    pub fn stop(&mut self, now: f64) -> StopOutcome {
        if self.state == SessionState::Idle {
            return StopOutcome::Discarded { reason: DiscardReason::NotStarted, metrics: self.metrics() };
        }
        self.state = SessionState::Idle;
        self.accrue(now);
        self.running_since = None;

        let metrics = self.metrics();
        let valid = metrics.distance_km > self.config.min_saved_distance_km
            && metrics.current_speed > self.config.min_saved_speed_kmh;

        let outcome = if valid {
            let record = self.record(&metrics);
            match self.store.save(&record) {
                Ok(()) => StopOutcome::Saved(record),
                Err(err) => {
                    log::error!("failed to save session {}: {}", record.session_id, err);
                    self.last_error = Some(err);
                    StopOutcome::Discarded { reason: DiscardReason::StoreFailed, metrics }
                }
            }
        } else {
            log::info!(
                "session discarded ({:.3} km, {:.1} km/h at stop)",
                metrics.distance_km,
                metrics.current_speed
            );
            StopOutcome::Discarded { reason: DiscardReason::TooShort, metrics }
        };

        self.reset();
        outcome
    }

    /// Accrue elapsed time; called by the 1 Hz session timer
    pub fn tick(&mut self, now: f64) {
        if self.state == SessionState::Running {
            self.accrue(now);
        }
    }

    fn accrue(&mut self, now: f64) {
        if let Some(since) = self.running_since {
            self.elapsed_secs += (now - since).max(0.0);
            self.running_since = Some(now);
        }
    }

    fn reset(&mut self) {
        self.fusion.reset();
        self.milestones.reset();
        self.acquisition = AcquisitionStatus::Inactive;
        self.started_at = None;
        self.running_since = None;
        self.elapsed_secs = 0.0;
        self.current_speed = 0.0;
        self.max_speed = 0.0;
        self.peak_g_force = 0.0;
        self.sensor_clock = None;
    }

    fn record(&self, metrics: &SessionMetrics) -> SessionRecord {
        let started_ms = (self.started_at.unwrap_or_default() * 1000.0) as i64;
        let started = Utc.timestamp_millis_opt(started_ms).single().unwrap_or_else(Utc::now);
        SessionRecord {
            session_id: SessionRecord::session_id_for(&started),
            started_at: started.to_rfc3339(),
            max_speed_kmh: metrics.max_speed,
            distance_km: metrics.distance_km,
            duration_secs: metrics.elapsed_secs,
            best_zero_to_hundred_secs: metrics.best_zero_to_hundred,
            best_zero_to_two_hundred_secs: metrics.best_zero_to_two_hundred,
            braking_distance_m: metrics.braking_distance_m,
            peak_g_force: metrics.peak_g_force,
        }
    }

    // ─── Samples ─────────────────────────────────────────────────────────────

    pub fn on_inertial(&mut self, sample: &InertialSample) -> Vec<MilestoneEvent> {
        let mut events = Vec::new();
        if self.state != SessionState::Running {
            return events;
        }
        let Some(update) = self.fusion.on_inertial(sample) else {
            return events;
        };
        self.advance_sensor_clock(sample.timestamp);

        if update.g_force > self.config.peak_g_floor && update.g_force > self.peak_g_force {
            self.peak_g_force = update.g_force;
        }

        let fused = self.fusion.estimate().value;
        if let Some(onset) = update.onset {
            events.extend(self.milestones.on_motion_onset(&onset, fused));
        }
        events.extend(self.milestones.on_forward_acceleration(&update.forward, fused));
        self.observe_speed(fused);
        self.apply(&events);
        events
    }

    pub fn on_fix(&mut self, fix: &AbsoluteFix) -> Vec<MilestoneEvent> {
        if self.state != SessionState::Running {
            return Vec::new();
        }
        let update = match self.fusion.on_fix(fix) {
            Ok(update) => update,
            Err(err) => {
                self.last_error = Some(err);
                return Vec::new();
            }
        };
        if matches!(self.last_error, Some(PipelineError::MalformedSample(_))) {
            self.last_error = None;
        }
        self.advance_sensor_clock(fix.timestamp);
        self.observe_speed(update.fused.value);

        let events = self.milestones.on_fix(&update);
        self.apply(&events);
        events
    }

    fn observe_speed(&mut self, speed: f64) {
        self.current_speed = speed;
        if speed > self.max_speed {
            self.max_speed = speed;
        }
    }

    fn advance_sensor_clock(&mut self, timestamp: f64) {
        if self.sensor_clock.map_or(true, |t| timestamp > t) {
            self.sensor_clock = Some(timestamp);
        }
    }

    fn apply(&mut self, events: &[MilestoneEvent]) {
        for event in events {
            match event {
                MilestoneEvent::Armed { kind, start_time, source } => {
                    log::debug!("{} armed at {:.3} ({:?})", kind.label(), start_time, source)
                }
                MilestoneEvent::Aborted { kind, .. } => log::debug!("{} run abandoned", kind.label()),
                _ => {}
            }
        }
        if events.iter().any(MilestoneEvent::ends_cycle) {
            self.fusion.reset_movement_detection();
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn metrics(&self) -> SessionMetrics {
        let running = |kind| self.sensor_clock.and_then(|now| self.milestones.running_duration(kind, now));
        SessionMetrics {
            current_speed: self.current_speed,
            max_speed: self.max_speed,
            distance_km: self.fusion.distance_m() / 1000.0,
            elapsed_secs: self.elapsed_secs,
            peak_g_force: self.peak_g_force,
            best_zero_to_hundred: self.milestones.best_zero_to_hundred(),
            best_zero_to_two_hundred: self.milestones.best_zero_to_two_hundred(),
            braking_distance_m: self.milestones.braking_distance_m(),
            running_zero_to_hundred: running(MilestoneKind::ZeroToHundred),
            running_zero_to_two_hundred: running(MilestoneKind::ZeroToTwoHundred),
        }
    }

    pub fn speed_estimate(&self) -> SpeedEstimate {
        self.fusion.estimate()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn acquisition(&self) -> AcquisitionStatus {
        self.acquisition
    }

    pub fn last_error(&self) -> Option<&PipelineError> {
        self.last_error.as_ref()
    }

    /// Running with reduced precision (no inertial path, or skipped samples)
    pub fn degraded(&self) -> bool {
        self.last_error.as_ref().map_or(false, PipelineError::is_degradation)
    }

    pub fn fusion_stats(&self) -> FusionStats {
        self.fusion.stats()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{GeoPosition, Vec3};
    use geo::HaversineDestination;

    fn aggregator() -> SessionAggregator<MemoryStore> {
        SessionAggregator::new(PipelineConfig::default(), MemoryStore::new())
    }

    fn started() -> SessionAggregator<MemoryStore> {
        let mut session = aggregator();
        session
            .start(1_700_000_000.0, LocationAuthorization::Authorized, InertialCapability::Available)
            .unwrap();
        session
    }

    /// Feed `count` fixes one second apart, `step_m` meters apart, at `speed`
    fn drive(session: &mut SessionAggregator<MemoryStore>, t0: f64, count: usize, speed: f64, step_m: f64) {
        let mut position = GeoPosition::new(52.52, 13.405);
        for i in 0..count {
            session.on_fix(&AbsoluteFix::new(t0 + i as f64, speed, position));
            position = GeoPosition::from_point(position.to_point().haversine_destination(45.0, step_m));
        }
    }

    #[test]
    fn test_permission_denied_disables() {
        let mut session = aggregator();
        let err = session
            .start(0.0, LocationAuthorization::Denied, InertialCapability::Available)
            .unwrap_err();
        assert_eq!(err, PipelineError::PermissionDenied);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.acquisition(), AcquisitionStatus::Disabled);
    }

    #[test]
    fn test_start_is_idempotent_for_clock() {
        let mut session = started();
        session.tick(1_700_000_010.0);
        session
            .start(1_700_000_010.0, LocationAuthorization::Authorized, InertialCapability::Available)
            .unwrap();
        session.tick(1_700_000_015.0);
        assert!((session.metrics().elapsed_secs - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_pause_freezes_clock_and_drops_samples() {
        let mut session = started();
        session.pause(1_700_000_004.0).unwrap();
        session.tick(1_700_000_100.0);
        assert!((session.metrics().elapsed_secs - 4.0).abs() < 1e-9);

        drive(&mut session, 10.0, 3, 60.0, 17.0);
        assert_eq!(session.speed_estimate().value, 0.0);

        session.resume(1_700_000_200.0).unwrap();
        session.tick(1_700_000_201.0);
        assert!((session.metrics().elapsed_secs - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = aggregator();
        assert!(matches!(session.pause(0.0), Err(PipelineError::InvalidTransition(_))));
        let mut session = started();
        assert!(matches!(session.resume(0.0), Err(PipelineError::InvalidTransition(_))));
    }

    #[test]
    fn test_start_while_paused_resumes() {
        let mut session = started();
        session.pause(1_700_000_001.0).unwrap();
        session
            .start(1_700_000_002.0, LocationAuthorization::Authorized, InertialCapability::Available)
            .unwrap();
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn test_short_session_discarded_and_reset() {
        let mut session = started();
        // 4 x 10 m at 36 km/h: 0.04 km
        drive(&mut session, 0.0, 5, 36.0, 10.0);
        let metrics = session.metrics();
        assert!(metrics.distance_km > 0.0 && metrics.distance_km < 0.1);

        let outcome = session.stop(1_700_000_005.0);
        assert!(matches!(outcome, StopOutcome::Discarded { reason: DiscardReason::TooShort, .. }));
        assert!(session.store().records.is_empty());
        assert_eq!(session.metrics(), SessionMetrics::default());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_valid_session_saved_with_pre_reset_metrics() {
        let mut session = started();
        // 19 x 10 m at 36 km/h: 0.19 km
        drive(&mut session, 0.0, 20, 36.0, 10.0);
        let before = session.metrics();
        assert!(before.distance_km > 0.1);
        assert!(before.current_speed > 5.0);

        let outcome = session.stop(1_700_000_020.0);
        let StopOutcome::Saved(record) = outcome else {
            panic!("expected a saved session");
        };
        assert!((record.distance_km - before.distance_km).abs() < 1e-12);
        assert!((record.max_speed_kmh - before.max_speed).abs() < 1e-12);
        assert!((record.duration_secs - 20.0).abs() < 1e-9);
        assert_eq!(session.store().records.len(), 1);
        assert_eq!(session.metrics(), SessionMetrics::default());
    }

    #[test]
    fn test_pause_clears_armed_window() {
        let mut session = started();
        drive(&mut session, 0.0, 1, 0.0, 0.0);
        let p = GeoPosition::new(52.52, 13.405);
        session.on_fix(&AbsoluteFix::new(1.0, 80.0, p));
        assert!(session.metrics().running_zero_to_hundred.is_some());

        session.pause(1_700_000_002.0).unwrap();
        session.resume(1_700_000_003.0).unwrap();
        // Would have completed the 0-100 started before the pause
        session.on_fix(&AbsoluteFix::new(2.0, 120.0, p));
        assert!(session.metrics().best_zero_to_hundred.is_none());
    }

    #[test]
    fn test_resume_while_moving_does_not_time_a_run() {
        let mut session = started();
        let p = GeoPosition::new(52.52, 13.405);
        session.on_fix(&AbsoluteFix::new(0.0, 0.0, p));
        session.on_fix(&AbsoluteFix::new(1.0, 90.0, p));
        session.pause(1_700_000_002.0).unwrap();
        session.resume(1_700_000_003.0).unwrap();

        session.on_fix(&AbsoluteFix::new(10.0, 95.0, p));
        session.on_fix(&AbsoluteFix::new(11.0, 105.0, p));
        let metrics = session.metrics();
        assert!(metrics.best_zero_to_hundred.is_none());
        assert!(metrics.running_zero_to_hundred.is_none());
    }

    #[test]
    fn test_malformed_fix_degrades_until_next_good_fix() {
        let mut session = started();
        let p = GeoPosition::new(52.52, 13.405);
        session.on_fix(&AbsoluteFix::new(0.0, 20.0, p));
        session.on_fix(&AbsoluteFix::new(0.0, 30.0, p));
        assert!(session.degraded());
        assert!(matches!(session.last_error(), Some(PipelineError::MalformedSample(_))));

        session.on_fix(&AbsoluteFix::new(1.0, 25.0, p));
        assert!(!session.degraded());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_peak_g_and_unavailable_inertial() {
        let mut session = aggregator();
        session
            .start(0.0, LocationAuthorization::Authorized, InertialCapability::Unavailable)
            .unwrap();
        assert_eq!(session.acquisition(), AcquisitionStatus::InertialUnavailable);
        assert_eq!(session.last_error(), Some(&PipelineError::SensorUnavailable));

        let sample = InertialSample::new(0.0, Vec3::new(0.6, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
        session.on_inertial(&sample);
        assert_eq!(session.metrics().peak_g_force, 0.0);

        let mut session = started();
        for (i, g) in [0.05, 0.4, 0.3].iter().enumerate() {
            let sample = InertialSample::new(i as f64 * 0.01, Vec3::new(*g, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
            session.on_inertial(&sample);
        }
        assert!((session.metrics().peak_g_force - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_stop_when_idle() {
        let mut session = aggregator();
        assert!(matches!(
            session.stop(0.0),
            StopOutcome::Discarded { reason: DiscardReason::NotStarted, .. }
        ));
    }
}
