use super::TrialStatus;
use crate::error::Error;
use crate::error::Result;
use crate::space::Params;
use crate::Score;
use crate::Seed;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// one evaluation of the objective at one parameter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: String,
    /// position in the study, assigned by the store.
    pub number: usize,
    pub params: Params,
    pub status: TrialStatus,
    pub bracket: usize,
    pub value: Option<Score>,
    pub error: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    pub seed: Seed,
    pub metadata: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Trial {
    pub fn new(params: Params, seed: Seed) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            number: 0,
            params,
            status: TrialStatus::Running,
            bracket: 0,
            value: None,
            error: None,
            metrics: BTreeMap::new(),
            seed,
            metadata: serde_json::Value::Null,
            started_at: now,
            completed_at: None,
            updated_at: now,
        }
    }

    /// final score when it exists and is finite; what samplers feed on.
    pub fn finite(&self) -> Option<Score> {
        self.value.filter(|v| v.is_finite())
    }
}

/// merge-semantics update for a trial. the store applies a patch
/// through `apply`, which is where the trial state machine and the
/// score/status coupling are enforced for every backend.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub status: Option<TrialStatus>,
    pub value: Option<Score>,
    pub error: Option<String>,
    pub metrics: Option<BTreeMap<String, f64>>,
    pub metadata: Option<serde_json::Value>,
    pub bracket: Option<usize>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Patch {
    pub fn status(status: TrialStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(&self, trial: &mut Trial) -> Result<()> {
        let next = self.status.unwrap_or(trial.status);
        if !trial.status.permits(next) {
            return Err(Error::trial_transition(&trial.id, trial.status, next));
        }
        if self.value.is_some() && !next.scoreable() {
            return Err(Error::InvalidTransition(format!(
                "trial {} cannot carry a score in status {}",
                trial.id, next
            )));
        }
        trial.status = next;
        if let Some(value) = self.value {
            trial.value = Some(value);
        }
        if let Some(ref error) = self.error {
            trial.error = Some(error.clone());
        }
        if let Some(ref metrics) = self.metrics {
            trial.metrics = metrics.clone();
        }
        if let Some(ref metadata) = self.metadata {
            trial.metadata = metadata.clone();
        }
        if let Some(bracket) = self.bracket {
            trial.bracket = bracket;
        }
        if let Some(completed_at) = self.completed_at {
            trial.completed_at = Some(completed_at);
        }
        trial.updated_at = Utc::now();
        Ok(())
    }
}

/// list_trials filter; empty matches everything in the study.
#[derive(Debug, Clone, Copy, Default)]
pub struct Filter {
    pub status: Option<TrialStatus>,
    pub bracket: Option<usize>,
    pub terminal: bool,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }
    pub fn status(status: TrialStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
    pub fn bracket(bracket: usize) -> Self {
        Self {
            bracket: Some(bracket),
            ..Self::default()
        }
    }
    /// only trials that reached a terminal state.
    pub fn finished() -> Self {
        Self {
            terminal: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, trial: &Trial) -> bool {
        if let Some(status) = self.status {
            if trial.status != status {
                return false;
            }
        }
        if let Some(bracket) = self.bracket {
            if trial.bracket != bracket {
                return false;
            }
        }
        if self.terminal && !trial.status.is_terminal() {
            return false;
        }
        true
    }
}
