use super::Gate;
use super::Pruner;
use crate::error::Error;
use crate::error::Result;
use crate::store::Store;
use crate::study::Goal;
use crate::Score;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HalvingOpts {
    /// culling factor between rungs
    pub eta: usize,
    /// steps covered by rung zero
    pub min_resource: usize,
    /// reporters required before any cut
    pub min_peers: usize,
    #[serde(flatten)]
    pub gate: Gate,
}

impl Default for HalvingOpts {
    fn default() -> Self {
        Self {
            eta: 3,
            min_resource: 1,
            min_peers: 4,
            gate: Gate::default(),
        }
    }
}

/// successive halving: at rung r only the best eta^-r fraction of the
/// bracket's reporters survives, never fewer than one.
pub struct Halving {
    opts: HalvingOpts,
}

impl Halving {
    pub fn new(options: &serde_json::Value) -> Result<Self> {
        let opts: HalvingOpts = super::decode(options)?;
        Self::from_opts(opts)
    }

    pub(crate) fn from_opts(opts: HalvingOpts) -> Result<Self> {
        if opts.eta < 2 {
            return Err(Error::InvalidConfig(format!(
                "successive halving needs eta >= 2, got {}",
                opts.eta
            )));
        }
        if opts.min_resource == 0 {
            return Err(Error::InvalidConfig(
                "successive halving needs min_resource >= 1".into(),
            ));
        }
        Ok(Self { opts })
    }

    /// integer-exact rung index: largest r with min_resource * eta^r <= step.
    pub(crate) fn rung(&self, step: usize) -> usize {
        let mut rung = 0;
        let mut resource = self.opts.min_resource;
        while resource.checked_mul(self.opts.eta).is_some_and(|next| next <= step) {
            resource *= self.opts.eta;
            rung += 1;
        }
        rung
    }

    /// survivors at rung r among m reporters: ceil(m * eta^-r), at
    /// least one.
    pub(crate) fn survivors(&self, reporters: usize, rung: usize) -> usize {
        match self.opts.eta.checked_pow(rung as u32) {
            Some(cut) => reporters.div_ceil(cut).max(1),
            None => 1,
        }
    }

    pub(crate) async fn decide(
        &self,
        store: &dyn Store,
        study_id: &str,
        goal: Goal,
        bracket: usize,
        step: usize,
        value: Score,
    ) -> Result<bool> {
        if self.opts.gate.holds(store, study_id, step).await? {
            return Ok(false);
        }
        let rung = self.rung(step);
        // the asking trial's own report is already recorded, so the
        // reporter count includes it
        let mut reporters = store
            .observations_at_rung(study_id, bracket, rung)
            .await?
            .into_iter()
            .map(|(_, v)| v)
            .filter(|v| v.is_finite())
            .collect::<Vec<_>>();
        if reporters.len() < self.opts.min_peers {
            return Ok(false);
        }
        let survivors = self.survivors(reporters.len(), rung);
        if survivors >= reporters.len() {
            return Ok(false);
        }
        reporters.sort_by(|a, b| {
            goal.losswise(*a)
                .partial_cmp(&goal.losswise(*b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let cutoff = reporters[survivors - 1];
        Ok(goal.worse(value, cutoff))
    }
}

#[async_trait::async_trait]
impl Pruner for Halving {
    fn rung_of(&self, step: usize) -> usize {
        self.rung(step)
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
        self.decide(store, study_id, goal, bracket, step, value).await
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

    fn pruner(json: serde_json::Value) -> Halving {
        Halving::new(&json).unwrap()
    }

    #[test]
    fn rungs_follow_integer_powers() {
        let halving = pruner(serde_json::json!({"eta": 3, "min_resource": 1}));
        for (step, want) in [(1, 0), (2, 0), (3, 1), (8, 1), (9, 2), (26, 2), (27, 3)] {
            assert_eq!(halving.rung(step), want, "step {}", step);
        }
        let scaled = pruner(serde_json::json!({"eta": 2, "min_resource": 4}));
        for (step, want) in [(4, 0), (7, 0), (8, 1), (16, 2), (31, 2), (32, 3)] {
            assert_eq!(scaled.rung(step), want, "step {}", step);
        }
    }

    #[test]
    fn survivor_counts_are_exact() {
        let halving = pruner(serde_json::json!({"eta": 3}));
        assert_eq!(halving.survivors(9, 0), 9);
        assert_eq!(halving.survivors(9, 1), 3);
        assert_eq!(halving.survivors(10, 1), 4);
        assert_eq!(halving.survivors(9, 2), 1);
        assert_eq!(halving.survivors(2, 5), 1);
        let doubling = pruner(serde_json::json!({"eta": 2}));
        assert_eq!(doubling.survivors(7, 1), 4);
        assert_eq!(doubling.survivors(7, 2), 2);
    }

    async fn seeded(store: &Memory, rung_step: usize, values: &[f64]) -> String {
        let study = Study::new("s", Goal::Minimize, Space::new().uniform("x", 0., 1.), 1);
        store.put_study(&study).await.unwrap();
        for &value in values {
            let id = store.add_trial("s", Trial::new(Params::new(), 1)).await.unwrap();
            let halving = pruner(serde_json::json!({"eta": 3}));
            store
                .record_observation("s", &id, 0, halving.rung(rung_step), value)
                .await
                .unwrap();
            store.finish_trial("s", &id, value).await.unwrap();
        }
        store.add_trial("s", Trial::new(Params::new(), 2)).await.unwrap()
    }

    #[tokio::test]
    async fn cuts_the_field_at_the_survivor_boundary() {
        let store = Memory::new();
        // nine peers at rung 1 (step 3), values 1..9
        let values = (1..=9).map(|v| v as f64).collect::<Vec<_>>();
        let probe = seeded(&store, 3, &values).await;
        let halving = pruner(serde_json::json!({"eta": 3, "n_startup_trials": 3}));
        // probe reports 3.5: ten reporters, ceil(10/3) = 4 survive, cutoff 4
        store.record_observation("s", &probe, 0, 1, 3.5).await.unwrap();
        assert!(!halving
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 3, 3.5)
            .await
            .unwrap());
        // probe reports 4.5: cutoff stays 4, strictly worse, pruned
        store.record_observation("s", &probe, 0, 1, 4.5).await.unwrap();
        assert!(halving
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 3, 4.5)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rung_zero_keeps_everyone() {
        let store = Memory::new();
        let values = (1..=9).map(|v| v as f64).collect::<Vec<_>>();
        let probe = seeded(&store, 1, &values).await;
        let halving = pruner(serde_json::json!({"eta": 3, "n_startup_trials": 3}));
        store.record_observation("s", &probe, 0, 0, 100.).await.unwrap();
        assert!(!halving
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 1, 100.)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn thin_fields_are_left_alone() {
        let store = Memory::new();
        let probe = seeded(&store, 3, &[1., 2.]).await;
        let halving = pruner(serde_json::json!({"eta": 3, "n_startup_trials": 1, "min_peers": 4}));
        store.record_observation("s", &probe, 0, 1, 50.).await.unwrap();
        assert!(!halving
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 3, 50.)
            .await
            .unwrap());
    }

    #[test]
    fn degenerate_options_are_rejected() {
        assert!(Halving::new(&serde_json::json!({"eta": 1})).is_err());
        assert!(Halving::new(&serde_json::json!({"min_resource": 0})).is_err());
    }
}
