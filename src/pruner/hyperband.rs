use super::Gate;
use super::Halving;
use super::HalvingOpts;
use super::Pruner;
use crate::error::Error;
use crate::error::Result;
use crate::store::Store;
use crate::study::Goal;
use crate::Score;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HyperbandOpts {
    pub eta: usize,
    pub max_resource: usize,
    pub min_resource: usize,
    pub min_peers: usize,
    #[serde(flatten)]
    pub gate: Gate,
}

impl Default for HyperbandOpts {
    fn default() -> Self {
        Self {
            eta: 3,
            max_resource: 81,
            min_resource: 1,
            min_peers: 4,
            gate: Gate::default(),
        }
    }
}

/// Hyperband: a family of successive-halving brackets precomputed
/// from eta and the resource ceiling, with trials dealt round-robin.
/// each bracket keeps its own rung schedule and its own peer set;
/// observations from different brackets never mix.
pub struct Hyperband {
    brackets: usize,
    inner: Halving,
}

impl Hyperband {
    pub fn new(options: &serde_json::Value) -> Result<Self> {
        let opts: HyperbandOpts = super::decode(options)?;
        if opts.eta < 2 {
            return Err(Error::InvalidConfig(format!(
                "hyperband needs eta >= 2, got {}",
                opts.eta
            )));
        }
        if opts.max_resource < opts.min_resource.max(1) {
            return Err(Error::InvalidConfig(format!(
                "hyperband needs max_resource >= min_resource, got {}",
                opts.max_resource
            )));
        }
        // s_max = floor(log_eta(max_resource)), computed in integers
        let mut s_max = 0;
        let mut resource = 1usize;
        while resource
            .checked_mul(opts.eta)
            .is_some_and(|next| next <= opts.max_resource)
        {
            resource *= opts.eta;
            s_max += 1;
        }
        let inner = Halving::from_opts(HalvingOpts {
            eta: opts.eta,
            min_resource: opts.min_resource,
            min_peers: opts.min_peers,
            gate: opts.gate,
        })?;
        Ok(Self {
            brackets: s_max + 1,
            inner,
        })
    }

    pub fn brackets(&self) -> usize {
        self.brackets
    }
}

#[async_trait::async_trait]
impl Pruner for Hyperband {
    /// round-robin cohort assignment by trial index.
    fn bracket_of(&self, index: usize) -> usize {
        index % self.brackets
    }

    fn rung_of(&self, step: usize) -> usize {
        self.inner.rung(step)
    }

    async fn should_prune(
        &self,
        store: &dyn Store,
        study_id: &str,
        _trial_id: &str,
        goal: Goal,
        bracket: usize,
        step: usize,
        value: Score,
    ) -> Result<bool> {
        // successive halving, scoped to the trial's own bracket
        self.inner
            .decide(store, study_id, goal, bracket, step, value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Params;
    use crate::store::Memory;
    use crate::study::Study;
    use crate::study::Trial;
    use crate::Space;

    #[test]
    fn bracket_count_follows_the_log() {
        let hyperband =
            Hyperband::new(&serde_json::json!({"eta": 3, "max_resource": 81})).unwrap();
        assert_eq!(hyperband.brackets(), 5);
        let small = Hyperband::new(&serde_json::json!({"eta": 3, "max_resource": 27})).unwrap();
        assert_eq!(small.brackets(), 4);
        let tiny = Hyperband::new(&serde_json::json!({"eta": 2, "max_resource": 1})).unwrap();
        assert_eq!(tiny.brackets(), 1);
    }

    #[test]
    fn brackets_deal_round_robin() {
        let hyperband =
            Hyperband::new(&serde_json::json!({"eta": 3, "max_resource": 27})).unwrap();
        let assigned = (0..5).map(|i| hyperband.bracket_of(i)).collect::<Vec<_>>();
        assert_eq!(assigned, vec![0, 1, 2, 3, 0]);
    }

    #[tokio::test]
    async fn brackets_are_isolated() {
        let store = Memory::new();
        let study = Study::new("s", Goal::Minimize, Space::new().uniform("x", 0., 1.), 1);
        store.put_study(&study).await.unwrap();
        // bracket 0 is crowded with strong peers at rung 1
        for value in [1., 2., 3., 4., 5., 6., 7., 8., 9.] {
            let id = store.add_trial("s", Trial::new(Params::new(), 1)).await.unwrap();
            store.record_observation("s", &id, 0, 1, value).await.unwrap();
            store.finish_trial("s", &id, value).await.unwrap();
        }
        let probe = store.add_trial("s", Trial::new(Params::new(), 2)).await.unwrap();
        let hyperband = Hyperband::new(
            &serde_json::json!({"eta": 3, "max_resource": 27, "n_startup_trials": 3}),
        )
        .unwrap();
        // the same poor report prunes in bracket 0 but survives in
        // bracket 1, whose rung is empty
        store.record_observation("s", &probe, 0, 1, 50.).await.unwrap();
        assert!(hyperband
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 3, 50.)
            .await
            .unwrap());
        let lonely = store.add_trial("s", Trial::new(Params::new(), 3)).await.unwrap();
        store.record_observation("s", &lonely, 1, 1, 50.).await.unwrap();
        assert!(!hyperband
            .should_prune(&store, "s", &lonely, Goal::Minimize, 1, 3, 50.)
            .await
            .unwrap());
    }
}
