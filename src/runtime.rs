// runtime.rs: single consumer loop around the session aggregator
//
// Every mutation (samples, lifecycle commands, the 1 Hz timer) goes through
// one mpsc channel and is applied by one task, in arrival order. Fused speed
// and metrics are published on watch channels.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::fusion::FusionStats;
use crate::session::{AcquisitionStatus, SessionAggregator, SessionMetrics, SessionState, StopOutcome};
use crate::storage::SessionStore;
use crate::types::{AbsoluteFix, InertialCapability, InertialSample, LocationAuthorization, SpeedEstimate};

pub const COMMAND_CHANNEL_CAPACITY: usize = 512;
const TICK_PERIOD: Duration = Duration::from_secs(1);

pub enum PipelineCommand {
    Inertial(InertialSample),
    Fix(AbsoluteFix),
    Start {
        authorization: LocationAuthorization,
        capability: InertialCapability,
        reply: oneshot::Sender<PipelineResult<()>>,
    },
    Pause { reply: oneshot::Sender<PipelineResult<()>> },
    Resume { reply: oneshot::Sender<PipelineResult<()>> },
    Stop { reply: oneshot::Sender<StopOutcome> },
    Snapshot { reply: oneshot::Sender<PipelineSnapshot> },
    Shutdown,
}

/// Point-in-time view of the consumer state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub state: SessionState,
    pub acquisition: AcquisitionStatus,
    pub estimate: SpeedEstimate,
    pub metrics: SessionMetrics,
    pub inertial_accepted: u64,
    pub inertial_rejected: u64,
    pub dt_anomalies: u64,
    pub fixes: u64,
    pub malformed_fixes: u64,
    pub degraded: bool,
    pub last_error: Option<String>,
}

impl PipelineSnapshot {
    fn capture<S: SessionStore>(session: &SessionAggregator<S>) -> Self {
        let FusionStats { inertial, fixes, malformed_fixes } = session.fusion_stats();
        Self {
            state: session.state(),
            acquisition: session.acquisition(),
            estimate: session.speed_estimate(),
            metrics: session.metrics(),
            inertial_accepted: inertial.accepted,
            inertial_rejected: inertial.rejected,
            dt_anomalies: inertial.dt_anomalies,
            fixes,
            malformed_fixes,
            degraded: session.degraded(),
            last_error: session.last_error().map(|e| e.to_string()),
        }
    }
}

/// Producer side for sensor feeds. Samples are dropped when the consumer is
/// behind, never queued without bound.
#[derive(Clone)]
pub struct PipelineSender {
    tx: mpsc::Sender<PipelineCommand>,
}

impl PipelineSender {
    /// `Ok(false)` when the sample was dropped on a full channel
    pub fn push_inertial(&self, sample: InertialSample) -> PipelineResult<bool> {
        self.push(PipelineCommand::Inertial(sample))
    }

    pub fn push_fix(&self, fix: AbsoluteFix) -> PipelineResult<bool> {
        self.push(PipelineCommand::Fix(fix))
    }

    fn push(&self, command: PipelineCommand) -> PipelineResult<bool> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(PipelineError::ChannelClosed),
        }
    }
}

pub struct PipelineHandle<S: SessionStore + 'static> {
    tx: mpsc::Sender<PipelineCommand>,
    speed: watch::Receiver<SpeedEstimate>,
    metrics: watch::Receiver<SessionMetrics>,
    task: JoinHandle<SessionAggregator<S>>,
}

impl<S: SessionStore + 'static> PipelineHandle<S> {
    pub fn sender(&self) -> PipelineSender {
        PipelineSender { tx: self.tx.clone() }
    }

    pub fn speed(&self) -> watch::Receiver<SpeedEstimate> {
        self.speed.clone()
    }

    pub fn metrics(&self) -> watch::Receiver<SessionMetrics> {
        self.metrics.clone()
    }

    pub async fn start(
        &self,
        authorization: LocationAuthorization,
        capability: InertialCapability,
    ) -> PipelineResult<()> {
        self.request(|reply| PipelineCommand::Start { authorization, capability, reply })
            .await?
    }

    pub async fn pause(&self) -> PipelineResult<()> {
        self.request(|reply| PipelineCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> PipelineResult<()> {
        self.request(|reply| PipelineCommand::Resume { reply }).await?
    }

    pub async fn stop(&self) -> PipelineResult<StopOutcome> {
        self.request(|reply| PipelineCommand::Stop { reply }).await
    }

    pub async fn snapshot(&self) -> PipelineResult<PipelineSnapshot> {
        self.request(|reply| PipelineCommand::Snapshot { reply }).await
    }

    /// Stop the consumer and hand back the aggregator (and its store)
    pub async fn shutdown(self) -> PipelineResult<SessionAggregator<S>> {
        self.tx.send(PipelineCommand::Shutdown).await.map_err(|_| PipelineError::ChannelClosed)?;
        self.task.await.map_err(|_| PipelineError::ChannelClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> PipelineCommand,
    ) -> PipelineResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx.send(command(reply)).await.map_err(|_| PipelineError::ChannelClosed)?;
        response.await.map_err(|_| PipelineError::ChannelClosed)
    }
}

/// Spawn the consumer task. Must be called inside a tokio runtime.
pub fn spawn_pipeline<S: SessionStore + 'static>(config: PipelineConfig, store: S) -> PipelineHandle<S> {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (speed_tx, speed_rx) = watch::channel(SpeedEstimate::default());
    let (metrics_tx, metrics_rx) = watch::channel(SessionMetrics::default());

    let session = SessionAggregator::new(config, store);
    let task = tokio::spawn(consumer_loop(session, rx, speed_tx, metrics_tx));

    PipelineHandle { tx, speed: speed_rx, metrics: metrics_rx, task }
}

async fn consumer_loop<S: SessionStore>(
    mut session: SessionAggregator<S>,
    mut rx: mpsc::Receiver<PipelineCommand>,
    speed_tx: watch::Sender<SpeedEstimate>,
    metrics_tx: watch::Sender<SessionMetrics>,
) -> SessionAggregator<S> {
    let mut ticker = interval(TICK_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    PipelineCommand::Inertial(sample) => {
                        let events = session.on_inertial(&sample);
                        speed_tx.send_replace(session.speed_estimate());
                        if !events.is_empty() {
                            metrics_tx.send_replace(session.metrics());
                        }
                    }
                    PipelineCommand::Fix(fix) => {
                        session.on_fix(&fix);
                        speed_tx.send_replace(session.speed_estimate());
                        metrics_tx.send_replace(session.metrics());
                    }
                    PipelineCommand::Start { authorization, capability, reply } => {
                        let result = session.start(current_timestamp(), authorization, capability);
                        let _ = reply.send(result);
                        metrics_tx.send_replace(session.metrics());
                    }
                    PipelineCommand::Pause { reply } => {
                        let _ = reply.send(session.pause(current_timestamp()));
                        metrics_tx.send_replace(session.metrics());
                    }
                    PipelineCommand::Resume { reply } => {
                        let _ = reply.send(session.resume(current_timestamp()));
                        metrics_tx.send_replace(session.metrics());
                    }
                    PipelineCommand::Stop { reply } => {
                        let outcome = session.stop(current_timestamp());
                        log::info!("session stopped, saved: {}", outcome.is_saved());
                        let _ = reply.send(outcome);
                        speed_tx.send_replace(session.speed_estimate());
                        metrics_tx.send_replace(session.metrics());
                    }
                    PipelineCommand::Snapshot { reply } => {
                        let _ = reply.send(PipelineSnapshot::capture(&session));
                    }
                    PipelineCommand::Shutdown => break,
                }
            }
            _ = ticker.tick() => {
                if session.state() == SessionState::Running {
                    session.tick(current_timestamp());
                    metrics_tx.send_replace(session.metrics());
                }
            }
        }
    }

    log::debug!("consumer loop exiting");
    session
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DiscardReason;
    use crate::storage::MemoryStore;
    use crate::types::GeoPosition;
    use geo::HaversineDestination;

    fn spawn() -> PipelineHandle<MemoryStore> {
        spawn_pipeline(PipelineConfig::default(), MemoryStore::new())
    }

    fn fixes(count: usize, speed: f64, step_m: f64) -> Vec<AbsoluteFix> {
        let mut position = GeoPosition::new(35.6762, 139.6503);
        (0..count)
            .map(|i| {
                let fix = AbsoluteFix::new(i as f64, speed, position);
                position = GeoPosition::from_point(position.to_point().haversine_destination(90.0, step_m));
                fix
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fixes_publish_speed() {
        let handle = spawn();
        handle.start(LocationAuthorization::Authorized, InertialCapability::Available).await.unwrap();

        let sender = handle.sender();
        for fix in fixes(5, 50.0, 14.0) {
            assert!(sender.push_fix(fix).unwrap());
        }
        // Commands are applied in order, so the snapshot sees every fix
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.fixes, 5);
        assert_eq!(snapshot.state, SessionState::Running);
        assert!(snapshot.estimate.value > 0.0);
        assert_eq!(*handle.speed().borrow(), snapshot.estimate);
        assert!(handle.metrics().borrow().distance_km > 0.0);
    }

    #[tokio::test]
    async fn test_samples_before_start_are_dropped() {
        let handle = spawn();
        let sender = handle.sender();
        for fix in fixes(3, 80.0, 22.0) {
            sender.push_fix(fix).unwrap();
        }
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.fixes, 0);
    }

    #[tokio::test]
    async fn test_lifecycle_errors_come_back_as_results() {
        let handle = spawn();
        assert!(matches!(handle.pause().await, Err(PipelineError::InvalidTransition(_))));
        assert_eq!(
            handle.start(LocationAuthorization::Restricted, InertialCapability::Available).await,
            Err(PipelineError::PermissionRestricted)
        );
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.acquisition, AcquisitionStatus::Disabled);
    }

    #[tokio::test]
    async fn test_stop_saves_and_shutdown_returns_store() {
        let handle = spawn();
        handle.start(LocationAuthorization::Authorized, InertialCapability::Available).await.unwrap();
        let sender = handle.sender();
        for fix in fixes(20, 36.0, 10.0) {
            sender.push_fix(fix).unwrap();
        }
        let outcome = handle.stop().await.unwrap();
        assert!(outcome.is_saved());
        assert_eq!(handle.metrics().borrow().distance_km, 0.0);

        let again = handle.stop().await.unwrap();
        assert!(matches!(again, StopOutcome::Discarded { reason: DiscardReason::NotStarted, .. }));

        let session = handle.shutdown().await.unwrap();
        assert_eq!(session.store().records.len(), 1);
        assert_eq!(sender.push_fix(fixes(1, 0.0, 0.0).remove(0)), Err(PipelineError::ChannelClosed));
    }
}
