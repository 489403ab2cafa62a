use crate::Score;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// an intermediate score reported by a running trial, keyed by
/// (study, trial, bracket, rung). append-heavy; read back per rung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub trial_id: String,
    pub bracket: usize,
    pub rung: usize,
    pub value: Score,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(trial_id: &str, bracket: usize, rung: usize, value: Score) -> Self {
        Self {
            trial_id: trial_id.to_string(),
            bracket,
            rung,
            value,
            created_at: Utc::now(),
        }
    }
}
