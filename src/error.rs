use thiserror::Error;

/// Pipeline error types
///
/// Sensor-side kinds are surfaced as status, never as faults that stop a
/// running session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Inertial sensor unavailable, running without inertial assist")]
    SensorUnavailable,

    #[error("Location access denied")]
    PermissionDenied,

    #[error("Location access restricted")]
    PermissionRestricted,

    #[error("Location authorization not determined")]
    PermissionNotDetermined,

    #[error("Malformed sample: {0}")]
    MalformedSample(String),

    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Pipeline channel closed")]
    ChannelClosed,
}

impl PipelineError {
    /// True for the kinds that only degrade precision
    pub fn is_degradation(&self) -> bool {
        matches!(self, PipelineError::SensorUnavailable | PipelineError::MalformedSample(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
