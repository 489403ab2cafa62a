use super::Gate;
use super::Pruner;
use crate::error::Error;
use crate::error::Result;
use crate::math;
use crate::store::Store;
use crate::study::Goal;
use crate::Score;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PercentileOpts {
    /// kept fraction of the peer field, in percent
    pub percentile: f64,
    #[serde(flatten)]
    pub gate: Gate,
}

impl Default for PercentileOpts {
    fn default() -> Self {
        Self {
            percentile: 50.,
            gate: Gate::default(),
        }
    }
}

/// generalized median pruner: prune when the trial falls outside the
/// best `percentile` percent of peer values at the same step, with
/// linear interpolation between ranks.
pub struct Percentile {
    percentile: f64,
    gate: Gate,
}

impl Percentile {
    pub fn new(options: &serde_json::Value) -> Result<Self> {
        let opts: PercentileOpts = super::decode(options)?;
        if !(0. ..=100.).contains(&opts.percentile) || !opts.percentile.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "percentile must sit in [0, 100], got {}",
                opts.percentile
            )));
        }
        Ok(Self {
            percentile: opts.percentile,
            gate: opts.gate,
        })
    }
}

#[async_trait::async_trait]
impl Pruner for Percentile {
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
        // the kept fraction is the better tail, whichever way better points
        let cutoff = match goal {
            Goal::Minimize => math::percentile(&peers, self.percentile),
            Goal::Maximize => math::percentile(&peers, 100. - self.percentile),
        };
        Ok(goal.worse(value, cutoff))
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

    async fn seeded(store: &Memory, values: &[f64]) -> String {
        let study = Study::new("s", Goal::Minimize, Space::new().uniform("x", 0., 1.), 1);
        store.put_study(&study).await.unwrap();
        for &value in values {
            let id = store.add_trial("s", Trial::new(Params::new(), 1)).await.unwrap();
            store.record_observation("s", &id, 0, 5, value).await.unwrap();
            store.finish_trial("s", &id, value).await.unwrap();
        }
        store.add_trial("s", Trial::new(Params::new(), 2)).await.unwrap()
    }

    #[tokio::test]
    async fn p50_with_odd_peers_is_the_median() {
        let store = Memory::new();
        let probe = seeded(&store, &[1., 2., 3., 4., 5.]).await;
        let pruner = Percentile::new(
            &serde_json::json!({"percentile": 50.0, "n_startup_trials": 3}),
        )
        .unwrap();
        // cutoff is exactly 3
        assert!(pruner
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 5, 3.01)
            .await
            .unwrap());
        assert!(!pruner
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 5, 3.)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn interpolates_between_ranks() {
        let store = Memory::new();
        let probe = seeded(&store, &[10., 20., 30., 40.]).await;
        let pruner = Percentile::new(
            &serde_json::json!({"percentile": 25.0, "n_startup_trials": 3}),
        )
        .unwrap();
        // k = 25 * 3 / 100 = 0.75 -> cutoff 17.5
        assert!(pruner
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 5, 18.)
            .await
            .unwrap());
        assert!(!pruner
            .should_prune(&store, "s", &probe, Goal::Minimize, 0, 5, 17.)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn maximize_keeps_the_upper_tail() {
        let store = Memory::new();
        let probe = seeded(&store, &[1., 2., 3., 4., 5.]).await;
        let pruner = Percentile::new(
            &serde_json::json!({"percentile": 25.0, "n_startup_trials": 3}),
        )
        .unwrap();
        // keeping the top quarter of {1..5} cuts at 4
        assert!(pruner
            .should_prune(&store, "s", &probe, Goal::Maximize, 0, 5, 3.9)
            .await
            .unwrap());
        assert!(!pruner
            .should_prune(&store, "s", &probe, Goal::Maximize, 0, 5, 4.1)
            .await
            .unwrap());
    }

    #[test]
    fn out_of_range_percentile_is_rejected() {
        assert!(Percentile::new(&serde_json::json!({"percentile": -1.0})).is_err());
        assert!(Percentile::new(&serde_json::json!({"percentile": 101.0})).is_err());
        assert!(Percentile::new(&serde_json::json!({"percentile": 100.0})).is_ok());
    }
}
