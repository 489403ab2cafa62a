use super::Random;
use super::Sampler;
use crate::error::Error;
use crate::error::Result;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::SpaceFn;
use crate::study::Goal;
use crate::study::Trial;
use crate::Unit;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CmaesOpts {
    pub min_obs: usize,
    /// generation size; defaults to 4 + 3 ln d
    pub population: Option<usize>,
    /// initial global step size in the unit cube
    pub sigma: f64,
}

impl Default for CmaesOpts {
    fn default() -> Self {
        Self {
            min_obs: 8,
            population: None,
            sigma: 0.3,
        }
    }
}

/// separable CMA-ES in the encoded unit cube: weighted recombination
/// of each generation's best half, a cumulative step path driving
/// global step-size adaptation, and per-coordinate variance updates
/// in place of the full covariance matrix.
#[derive(Debug)]
pub struct Cmaes {
    opts: CmaesOpts,
    goal: Goal,
    state: Option<State>,
}

#[derive(Debug)]
struct State {
    mean: Vec<f64>,
    variances: Vec<f64>,
    path: Vec<f64>,
    sigma: f64,
    /// finished trials already folded into the distribution
    processed: usize,
}

impl Cmaes {
    pub fn new(options: &serde_json::Value, goal: Goal) -> Result<Self> {
        let opts: CmaesOpts = super::decode(options)?;
        if !(opts.sigma > 0.) {
            return Err(Error::InvalidConfig(format!(
                "cmaes sigma must be positive, got {}",
                opts.sigma
            )));
        }
        Ok(Self {
            opts,
            goal,
            state: None,
        })
    }

    fn lambda(&self, dims: usize) -> usize {
        self.opts
            .population
            .unwrap_or(4 + (3. * (dims.max(1) as f64).ln()).floor() as usize)
            .max(2)
    }

    /// log-linear recombination weights over the best mu parents.
    fn weights(mu: usize) -> Vec<f64> {
        let raw = (0..mu)
            .map(|i| ((mu as f64) + 0.5).ln() - ((i + 1) as f64).ln())
            .collect::<Vec<_>>();
        let total = raw.iter().sum::<f64>();
        raw.into_iter().map(|w| w / total).collect()
    }

    /// fold one finished generation into mean, variances and step size.
    fn update(&mut self, rows: &[(Vec<Unit>, f64)], dims: usize) {
        let state = self.state.as_mut().expect("state initialized");
        let lambda = rows.len();
        let mu = (lambda / 2).max(1);
        let weights = Self::weights(mu);
        let mu_eff = 1. / weights.iter().map(|w| w * w).sum::<f64>();
        let mut ranked = rows.to_vec();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let parents = &ranked[..mu];
        let mean = (0..dims)
            .map(|j| {
                parents
                    .iter()
                    .zip(weights.iter())
                    .map(|((x, _), w)| w * x[j])
                    .sum::<f64>()
            })
            .collect::<Vec<_>>();
        let d = dims as f64;
        let c_sigma = (mu_eff + 2.) / (d + mu_eff + 5.);
        let d_sigma = 1. + c_sigma + 2. * (((mu_eff - 1.) / (d + 1.)).max(0.).sqrt() - 1.).max(0.);
        let c_cov = (2. * mu_eff / ((d + 2.).powi(2) + mu_eff)).min(1.);
        // cumulative step path against the old distribution
        let norm = (c_sigma * (2. - c_sigma) * mu_eff).sqrt();
        for j in 0..dims {
            let step = (mean[j] - state.mean[j])
                / (state.sigma * state.variances[j].sqrt()).max(crate::DENOM_FLOOR);
            state.path[j] = (1. - c_sigma) * state.path[j] + norm * step;
        }
        // per-coordinate variance recombination
        for j in 0..dims {
            let spread = parents
                .iter()
                .zip(weights.iter())
                .map(|((x, _), w)| {
                    let z = (x[j] - state.mean[j]) / state.sigma.max(crate::DENOM_FLOOR);
                    w * z * z
                })
                .sum::<f64>();
            state.variances[j] =
                ((1. - c_cov) * state.variances[j] + c_cov * spread).max(crate::DENOM_FLOOR);
        }
        let path_norm = state.path.iter().map(|p| p * p).sum::<f64>().sqrt();
        let expected = d.sqrt() * (1. - 1. / (4. * d) + 1. / (21. * d * d));
        state.sigma *= ((c_sigma / d_sigma) * (path_norm / expected - 1.)).exp();
        state.sigma = state.sigma.clamp(1e-6, 1.);
        state.mean = mean;
        state.processed += lambda;
    }
}

impl Sampler for Cmaes {
    fn next(
        &mut self,
        space: &SpaceFn,
        index: usize,
        history: &[Trial],
        stream: &mut Stream,
    ) -> Result<Params> {
        let spec = space(index);
        let dims = spec.dims();
        let scored = super::scored(history);
        if scored.len() < self.opts.min_obs {
            return Random.next(space, index, history, stream);
        }
        let rows = scored
            .iter()
            .filter_map(|t| {
                let y = self.goal.losswise(t.finite()?);
                spec.encode(&t.params).ok().map(|x| (x, y))
            })
            .collect::<Vec<_>>();
        if rows.len() < self.opts.min_obs {
            return Random.next(space, index, history, stream);
        }
        if self.state.is_none() {
            // seed the distribution from everything seen so far
            let mut ranked = rows.clone();
            ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            let mu = (ranked.len() / 2).max(1);
            let weights = Self::weights(mu);
            let mean = (0..dims)
                .map(|j| {
                    ranked[..mu]
                        .iter()
                        .zip(weights.iter())
                        .map(|((x, _), w)| w * x[j])
                        .sum::<f64>()
                })
                .collect();
            self.state = Some(State {
                mean,
                variances: vec![1.; dims],
                path: vec![0.; dims],
                sigma: self.opts.sigma,
                processed: rows.len(),
            });
        }
        let lambda = self.lambda(dims);
        let pending = rows.len()
            - self
                .state
                .as_ref()
                .map(|s| s.processed.min(rows.len()))
                .unwrap_or(0);
        if pending >= lambda {
            let generation = rows[rows.len() - lambda..].to_vec();
            self.update(&generation, dims);
        }
        let state = self.state.as_ref().expect("state initialized");
        let point = (0..dims)
            .map(|j| {
                stream
                    .normal(state.mean[j], state.sigma * state.variances[j].sqrt())
                    .clamp(0., 1.)
            })
            .collect::<Vec<_>>();
        Ok(spec.decode(&point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Value;
    use crate::study::TrialStatus;
    use crate::Space;

    fn trial(x: f64, y: f64, value: f64) -> Trial {
        let mut trial = Trial::new(Params::new(), 1);
        trial.params.insert("x".to_string(), Value::Real(x));
        trial.params.insert("y".to_string(), Value::Real(y));
        trial.value = Some(value);
        trial.status = TrialStatus::Completed;
        trial
    }

    fn space() -> SpaceFn {
        Space::new().uniform("x", 0., 1.).uniform("y", 0., 1.).constant()
    }

    #[test]
    fn warms_up_with_random() {
        let mut cmaes = Cmaes::new(&serde_json::Value::Null, Goal::Minimize).unwrap();
        let ref mut a = Stream::for_trial(1, 0);
        let ref mut b = Stream::for_trial(1, 0);
        assert_eq!(
            cmaes.next(&space(), 0, &[], a).unwrap(),
            Random.next(&space(), 0, &[], b).unwrap()
        );
    }

    #[test]
    fn mean_moves_toward_the_winners() {
        // winners cluster near (0.8, 0.2)
        let history = (0..32)
            .map(|i| {
                let x = (i % 8) as f64 / 7.;
                let y = (i / 8) as f64 / 3.;
                trial(x, y, (x - 0.8).powi(2) + (y - 0.2).powi(2))
            })
            .collect::<Vec<_>>();
        let mut cmaes = Cmaes::new(&serde_json::Value::Null, Goal::Minimize).unwrap();
        let ref mut stream = Stream::for_trial(42, 32);
        cmaes.next(&space(), 32, &history, stream).unwrap();
        let state = cmaes.state.as_ref().unwrap();
        assert!(state.mean[0] > 0.5, "mean x = {}", state.mean[0]);
        assert!(state.mean[1] < 0.5, "mean y = {}", state.mean[1]);
    }

    #[test]
    fn proposals_stay_in_bounds() {
        let history = (0..24)
            .map(|i| {
                let t = i as f64 / 23.;
                trial(t, 1. - t, (t - 0.5).powi(2))
            })
            .collect::<Vec<_>>();
        let mut cmaes = Cmaes::new(&serde_json::Value::Null, Goal::Minimize).unwrap();
        let ref mut stream = Stream::for_trial(3, 24);
        for i in 0..16 {
            let params = cmaes.next(&space(), 24 + i, &history, stream).unwrap();
            for value in params.values() {
                let x = value.as_f64().unwrap();
                assert!((0. ..=1.).contains(&x));
            }
        }
    }

    #[test]
    fn generations_advance_the_processed_counter() {
        let mut history = (0..8)
            .map(|i| trial(i as f64 / 7., 0.5, i as f64))
            .collect::<Vec<_>>();
        let mut cmaes = Cmaes::new(&serde_json::Value::Null, Goal::Minimize).unwrap();
        let ref mut stream = Stream::for_trial(9, 8);
        cmaes.next(&space(), 8, &history, stream).unwrap();
        let processed = cmaes.state.as_ref().unwrap().processed;
        // a full extra generation triggers an update
        let lambda = cmaes.lambda(2);
        for i in 0..lambda {
            history.push(trial(0.5, 0.5, 0.1 * i as f64));
        }
        cmaes.next(&space(), 8 + lambda, &history, stream).unwrap();
        assert!(cmaes.state.as_ref().unwrap().processed > processed);
    }

    #[test]
    fn non_positive_sigma_is_rejected() {
        assert!(Cmaes::new(&serde_json::json!({"sigma": 0.}), Goal::Minimize).is_err());
    }
}
