use super::Gate;
use super::Pruner;
use crate::error::Result;
use crate::math;
use crate::store::Store;
use crate::study::Goal;
use crate::Score;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MedianOpts {
    #[serde(flatten)]
    pub gate: Gate,
}

/// prune when the trial's intermediate value is worse than the
/// median of its peers at the same step.
pub struct Median {
    gate: Gate,
}

impl Median {
    pub fn new(options: &serde_json::Value) -> Result<Self> {
        let opts: MedianOpts = super::decode(options)?;
        Ok(Self { gate: opts.gate })
    }
}

#[async_trait::async_trait]
impl Pruner for Median {
    async fn should_prune(
        &self,
        store: &dyn Store,
        study_id: &str,
        trial_id: &str,
        goal: Goal,
        bracket: usize,
        step: usize,
        value: Score,
    ) -> Result<bool> {
        if self.gate.holds(store, study_id, step).await? {
            return Ok(false);
        }
        let mut peers = super::peer_values(store, study_id, trial_id, bracket, step).await?;
        if peers.is_empty() {
            return Ok(false);
        }
        peers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = math::percentile(&peers, 50.);
        Ok(goal.worse(value, median))
    }
}
