use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Finished session handed to persistence on a valid stop
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// RFC 3339
    pub started_at: String,
    pub max_speed_kmh: f64,
    pub distance_km: f64,
    pub duration_secs: f64,
    pub best_zero_to_hundred_secs: Option<f64>,
    pub best_zero_to_two_hundred_secs: Option<f64>,
    pub braking_distance_m: Option<f64>,
    pub peak_g_force: f64,
}

impl SessionRecord {
    /// Session ids are derived from the start time, e.g. `20250114_083012`
    pub fn session_id_for(started_at: &DateTime<Utc>) -> String {
        started_at.format("%Y%m%d_%H%M%S").to_string()
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Storage(e.to_string()))
    }
}

/// Persistence collaborator. Injected into the session aggregator.
pub trait SessionStore: Send {
    fn save(&mut self, record: &SessionRecord) -> PipelineResult<()>;
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub records: Vec<SessionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn save(&mut self, record: &SessionRecord) -> PipelineResult<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Writes `session_<id>.json` into a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> PipelineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| PipelineError::Storage(format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, record: &SessionRecord) -> PathBuf {
        self.dir.join(format!("session_{}.json", record.session_id))
    }

    pub fn load(path: &Path) -> PipelineResult<SessionRecord> {
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::Storage(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text).map_err(|e| PipelineError::Storage(e.to_string()))
    }
}

impl SessionStore for JsonFileStore {
    fn save(&mut self, record: &SessionRecord) -> PipelineResult<()> {
        let path = self.path_for(record);
        let json = record.to_json()?;
        fs::write(&path, json)
            .map_err(|e| PipelineError::Storage(format!("{}: {}", path.display(), e)))?;
        log::info!("session {} saved to {}", record.session_id, path.display());
        Ok(())
    }
}
