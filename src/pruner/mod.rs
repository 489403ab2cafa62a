mod halving;
mod hyperband;
mod median;
mod percentile;

pub use halving::*;
pub use hyperband::*;
pub use median::*;
pub use percentile::*;

use crate::error::Error;
use crate::error::Result;
use crate::store::Store;
use crate::study::Filter;
use crate::study::Goal;
use crate::study::TrialStatus;
use crate::Score;
use serde::Deserialize;

/// early-stopping policies. the executor records each intermediate
/// observation first (acknowledged), then asks the pruner; the peer
/// sets a pruner consults are therefore never stale.
#[async_trait::async_trait]
pub trait Pruner: Send + Sync {
    /// cohort assignment for a fresh trial; only multi-bracket
    /// strategies override this.
    fn bracket_of(&self, index: usize) -> usize {
        let _ = index;
        0
    }

    /// observation rung for a reported step.
    fn rung_of(&self, step: usize) -> usize {
        step
    }

    async fn should_prune(
        &self,
        store: &dyn Store,
        study_id: &str,
        trial_id: &str,
        goal: Goal,
        bracket: usize,
        step: usize,
        value: Score,
    ) -> Result<bool>;
}

pub const PRUNERS: &[&str] = &[
    "none",
    "median",
    "percentile",
    "successive_halving",
    "hyperband",
];

/// the closed pruner whitelist; "none" means no pruning at all.
pub fn build(name: &str, options: &serde_json::Value) -> Result<Option<Box<dyn Pruner>>> {
    match name {
        "none" => Ok(None),
        "median" => Ok(Some(Box::new(Median::new(options)?))),
        "percentile" => Ok(Some(Box::new(Percentile::new(options)?))),
        "successive_halving" => Ok(Some(Box::new(Halving::new(options)?))),
        "hyperband" => Ok(Some(Box::new(Hyperband::new(options)?))),
        other => Err(Error::InvalidConfig(format!(
            "unknown pruner {:?}; pick one of {}",
            other,
            PRUNERS.join(", ")
        ))),
    }
}

/// decode a pruner options map, treating null as defaults.
pub(crate) fn decode<T>(options: &serde_json::Value) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match options {
        serde_json::Value::Null => Ok(T::default()),
        value => serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidConfig(format!("bad options: {}", e))),
    }
}

/// the shared gating rules every pruner honors before its own logic:
/// a per-trial warmup, a completed-peer startup quorum, and a step
/// interval.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Gate {
    pub n_warmup_steps: usize,
    pub n_startup_trials: usize,
    pub interval_steps: usize,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            n_warmup_steps: 0,
            n_startup_trials: 4,
            interval_steps: 1,
        }
    }
}

impl Gate {
    /// true when the shared rules say "do not even evaluate".
    pub async fn holds(&self, store: &dyn Store, study_id: &str, step: usize) -> Result<bool> {
        if step < self.n_warmup_steps {
            return Ok(true);
        }
        if self.interval_steps > 1 && step % self.interval_steps != 0 {
            return Ok(true);
        }
        let completed = store
            .list_trials(study_id, Filter::status(TrialStatus::Completed))
            .await?
            .len();
        Ok(completed < self.n_startup_trials)
    }
}

/// peer values at a rung, excluding the asking trial's own report.
pub(crate) async fn peer_values(
    store: &dyn Store,
    study_id: &str,
    trial_id: &str,
    bracket: usize,
    rung: usize,
) -> Result<Vec<Score>> {
    Ok(store
        .observations_at_rung(study_id, bracket, rung)
        .await?
        .into_iter()
        .filter(|(id, _)| id != trial_id)
        .map(|(_, value)| value)
        .filter(|value| value.is_finite())
        .collect())
}
