use super::Goal;
use super::StudyStatus;
use crate::space::Space;
use crate::Seed;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// a persisted study record. the live search-space descriptor is a
/// function of trial index; what gets stored here is its snapshot at
/// index zero, enough for export and inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub id: String,
    pub goal: Goal,
    pub space: Space,
    pub max_trials: usize,
    pub parallelism: usize,
    /// master seed; bootstrapped from OS entropy when the caller
    /// fixes none, and recorded either way for replayability.
    pub seed: Seed,
    pub sampler: String,
    pub sampler_opts: serde_json::Value,
    pub pruner: Option<String>,
    pub pruner_opts: serde_json::Value,
    pub status: StudyStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Study {
    pub fn new(id: &str, goal: Goal, space: Space, seed: Seed) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            goal,
            space,
            max_trials: 0,
            parallelism: 1,
            seed,
            sampler: "random".to_string(),
            sampler_opts: serde_json::Value::Null,
            pruner: None,
            pruner_opts: serde_json::Value::Null,
            status: StudyStatus::Pending,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}
