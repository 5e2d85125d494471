//! SpeedLab: vehicle performance metrics from fused inertial and absolute
//! speed streams.
//!
//! Inertial samples drive a scalar filter's predict step through a
//! direction-locked preprocessor; absolute fixes drive its correct step. The
//! fused stream feeds the milestone engine (0–100, 0–200, 100–0 braking) and
//! the session aggregator, all serialized by one consumer task.

pub mod config;
pub mod error;
pub mod filters;
pub mod fusion;
pub mod inertial;
pub mod live_status;
pub mod milestones;
pub mod runtime;
pub mod session;
pub mod simulation;
pub mod storage;
pub mod types;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use filters::ScalarFusionFilter;
pub use fusion::{FixUpdate, FusionController};
pub use inertial::{InertialPreprocessor, InertialUpdate};
pub use milestones::{MilestoneEvent, MilestoneKind, MilestoneTimingEngine};
pub use runtime::{spawn_pipeline, PipelineCommand, PipelineHandle, PipelineSender, PipelineSnapshot};
pub use session::{SessionAggregator, SessionMetrics, SessionState, StopOutcome};
pub use storage::{JsonFileStore, MemoryStore, SessionRecord, SessionStore};
