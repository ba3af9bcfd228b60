//! Serializable record of a run, used to continue a workflow later.
//!
//! The engine never persists anything itself. A caller accumulates the
//! `StepRun` records it receives into a `Checkpoint`, stores it wherever it
//! likes, and passes `initial_values()` to the next run.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rivulet_types::value::Variable;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::StepRun;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name of the workflow the records belong to.
    pub workflow: String,
    /// Run that produced the most recent records.
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Records in emission order, possibly spanning several runs.
    #[serde(default)]
    pub records: Vec<StepRun>,
}

impl Checkpoint {
    pub fn new(workflow: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            workflow: workflow.into(),
            run_id,
            created_at: Utc::now(),
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, record: StepRun) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = StepRun>) {
        self.records.extend(records);
    }

    /// Latest value per step, ordered by name.
    ///
    /// Considers `Completed` values and `Variable` records; a value with a
    /// lower generation never replaces a higher one, regardless of order.
    pub fn initial_values(&self) -> Vec<Variable> {
        let mut latest: BTreeMap<&str, &Variable> = BTreeMap::new();
        for value in self.records.iter().filter_map(StepRun::value) {
            match latest.get(value.name.as_str()) {
                Some(existing) if !value.supersedes(existing) => {}
                _ => {
                    latest.insert(value.name.as_str(), value);
                }
            }
        }
        latest.into_values().cloned().collect()
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = self.to_json()?;
        tokio::fs::write(path, json).await?;
        tracing::debug!(
            path = %path.display(),
            records = self.records.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, CheckpointError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
