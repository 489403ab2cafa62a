use super::Random;
use super::Sampler;
use crate::error::Error;
use crate::error::Result;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::SpaceFn;
use crate::study::Goal;
use crate::study::Trial;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BanditOpts {
    /// arms per parameter, slicing its encoded range
    pub buckets: usize,
    /// exploration rate
    pub epsilon: f64,
}

impl Default for BanditOpts {
    fn default() -> Self {
        Self {
            buckets: 8,
            epsilon: 0.1,
        }
    }
}

/// epsilon-greedy UCB1, one bandit per parameter. each parameter's
/// encoded range is sliced into buckets; arm statistics are rebuilt
/// from history on every call, so the sampler itself stays stateless
/// and parallel-friendly.
#[derive(Debug)]
pub struct Bandit {
    opts: BanditOpts,
    goal: Goal,
}

impl Bandit {
    pub fn new(options: &serde_json::Value, goal: Goal) -> Result<Self> {
        let opts: BanditOpts = super::decode(options)?;
        if opts.buckets < 2 {
            return Err(Error::InvalidConfig(
                "bandit needs at least 2 buckets".into(),
            ));
        }
        if !(0. ..=1.).contains(&opts.epsilon) {
            return Err(Error::InvalidConfig(format!(
                "bandit epsilon must sit in [0, 1], got {}",
                opts.epsilon
            )));
        }
        Ok(Self { opts, goal })
    }

    /// UCB1 pick with epsilon-greedy exploration; unvisited arms win
    /// outright so every bucket gets pulled eventually.
    fn pick(&self, counts: &[usize], rewards: &[f64], stream: &mut Stream) -> usize {
        let k = self.opts.buckets;
        if stream.unit() < self.opts.epsilon {
            return stream.index(k);
        }
        let total = counts.iter().sum::<usize>().max(1) as f64;
        let mut best = 0;
        let mut top = f64::NEG_INFINITY;
        for arm in 0..k {
            let score = match counts[arm] {
                0 => f64::INFINITY,
                n => rewards[arm] / n as f64 + (2. * total.ln() / n as f64).sqrt(),
            };
            if score > top {
                top = score;
                best = arm;
            }
        }
        best
    }
}

impl Sampler for Bandit {
    fn next(
        &mut self,
        space: &SpaceFn,
        index: usize,
        history: &[Trial],
        stream: &mut Stream,
    ) -> Result<Params> {
        let spec = space(index);
        let scored = super::scored(history);
        if scored.is_empty() {
            return Random.next(space, index, history, stream);
        }
        let k = self.opts.buckets;
        let mut params = Params::new();
        for (name, pspec) in spec.iter() {
            let mut counts = vec![0usize; k];
            let mut rewards = vec![0f64; k];
            for trial in &scored {
                let Some(value) = trial.params.get(name) else {
                    continue;
                };
                let Ok(u) = pspec.encode(value) else {
                    continue;
                };
                let arm = ((u * k as f64).floor() as usize).min(k - 1);
                counts[arm] += 1;
                // fold to "higher is better" for the ucb score
                rewards[arm] -= self.goal.losswise(trial.finite().unwrap_or(0.));
            }
            let arm = self.pick(&counts, &rewards, stream);
            let u = (arm as f64 + stream.unit()) / k as f64;
            params.insert(name.clone(), pspec.decode(u));
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Value;
    use crate::study::TrialStatus;
    use crate::Space;

    fn trial(x: f64, value: f64) -> Trial {
        let mut trial = Trial::new(Params::new(), 1);
        trial.params.insert("x".to_string(), Value::Real(x));
        trial.value = Some(value);
        trial.status = TrialStatus::Completed;
        trial
    }

    fn space() -> SpaceFn {
        Space::new().uniform("x", 0., 1.).constant()
    }

    #[test]
    fn empty_history_falls_back_to_random() {
        let mut bandit = Bandit::new(&serde_json::Value::Null, Goal::Minimize).unwrap();
        let ref mut a = Stream::for_trial(1, 0);
        let ref mut b = Stream::for_trial(1, 0);
        assert_eq!(
            bandit.next(&space(), 0, &[], a).unwrap(),
            Random.next(&space(), 0, &[], b).unwrap()
        );
    }

    #[test]
    fn exploits_the_best_arm_once_all_are_pulled() {
        // every bucket visited; bucket of x ~ 0.9 scores far best
        let history = (0..64)
            .map(|i| {
                let x = (i % 8) as f64 / 8. + 0.05;
                trial(x, if x > 0.85 { 0. } else { 10. })
            })
            .collect::<Vec<_>>();
        let mut bandit = Bandit::new(
            &serde_json::json!({"epsilon": 0.0}),
            Goal::Minimize,
        )
        .unwrap();
        let ref mut stream = Stream::for_trial(42, 64);
        let pulls = (0..16)
            .map(|i| {
                bandit.next(&space(), 64 + i, &history, stream).unwrap()["x"]
                    .as_f64()
                    .unwrap()
            })
            .collect::<Vec<_>>();
        let wins = pulls.iter().filter(|&&x| x > 0.85).count();
        assert!(wins >= 12, "only {} of 16 pulls hit the best arm", wins);
    }

    #[test]
    fn unvisited_arms_get_explored_first() {
        // only one bucket visited so far
        let history = vec![trial(0.05, 1.)];
        let mut bandit = Bandit::new(&serde_json::json!({"epsilon": 0.0}), Goal::Minimize).unwrap();
        let ref mut stream = Stream::for_trial(7, 1);
        let x = bandit.next(&space(), 1, &history, stream).unwrap()["x"]
            .as_f64()
            .unwrap();
        assert!(x > 1. / 8., "should have pulled an unvisited arm, got {}", x);
    }

    #[test]
    fn bad_epsilon_is_rejected() {
        assert!(Bandit::new(&serde_json::json!({"epsilon": 1.5}), Goal::Minimize).is_err());
        assert!(Bandit::new(&serde_json::json!({"buckets": 1}), Goal::Minimize).is_err());
    }
}
