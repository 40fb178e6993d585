//! Persisted per-zone state.
//!
//! One JSON file per zone, written atomically: the content goes to a
//! temporary file in the target directory first, then an atomic rename
//! replaces the old state. An interrupted write never leaves a partial
//! file, and a failed write leaves the in-memory state authoritative.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::HeatwiseError;
use crate::feedback::AnticipationResult;
use crate::thermal::HeatingSession;

pub const STATE_VERSION: u32 = 1;

/// The advisor answer worth keeping across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredAdvisorResponse {
    #[serde(default)]
    pub margin_adjustment: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub provider: String,
}

/// Versioned zone state schema. Decoded defensively: unknown fields are
/// ignored, missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub sessions: Vec<HeatingSession>,
    #[serde(default)]
    pub last_off_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub last_advisor_response: Option<StoredAdvisorResponse>,
    #[serde(default)]
    pub feedback_history: Vec<AnticipationResult>,
}

impl Default for ZoneState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            sessions: Vec::new(),
            last_off_time: None,
            last_advisor_response: None,
            feedback_history: Vec::new(),
        }
    }
}

fn default_version() -> u32 {
    STATE_VERSION
}

/// File-backed store for one zone's state.
pub struct ZoneStore {
    path: PathBuf,
}

impl ZoneStore {
    pub fn new(data_dir: &Path, zone_name: &str) -> Self {
        Self {
            path: data_dir.join(format!("zone_{zone_name}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state; a missing file yields the default state.
    pub fn load(&self) -> Result<ZoneState, HeatwiseError> {
        if !self.path.exists() {
            return Ok(ZoneState::default());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            HeatwiseError::Persistence(format!("read {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            HeatwiseError::Persistence(format!("decode {}: {e}", self.path.display()))
        })
    }

    /// Write the state atomically: temp file in the same directory, flush,
    /// then rename over the target.
    pub fn save(&self, state: &ZoneState) -> Result<(), HeatwiseError> {
        let parent = self.path.parent().ok_or_else(|| {
            HeatwiseError::Persistence(format!("no parent directory for {}", self.path.display()))
        })?;
        std::fs::create_dir_all(parent).map_err(|e| {
            HeatwiseError::Persistence(format!("create {}: {e}", parent.display()))
        })?;

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| HeatwiseError::Persistence(format!("encode zone state: {e}")))?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| {
            HeatwiseError::Persistence(format!("temp file in {}: {e}", parent.display()))
        })?;
        temp.write_all(json.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| HeatwiseError::Persistence(format!("write zone state: {e}")))?;
        temp.persist(&self.path).map_err(|e| {
            HeatwiseError::Persistence(format!("rename to {}: {e}", self.path.display()))
        })?;

        info!(
            "persisted zone state to {} ({} sessions, {} feedback results)",
            self.path.display(),
            state.sessions.len(),
            state.feedback_history.len(),
        );
        Ok(())
    }
}
