use super::Random;
use super::Sampler;
use crate::error::Error;
use crate::error::Result;
use crate::math;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::SpaceFn;
use crate::study::Goal;
use crate::study::Trial;
use crate::Unit;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpOpts {
    pub min_obs: usize,
    pub n_candidates: usize,
    /// "ei", "ucb" or "pi"
    pub acquisition: String,
    pub length_scale: f64,
    pub noise: f64,
    /// exploration weight for ucb
    pub kappa: f64,
    /// improvement margin for ei / pi
    pub xi: f64,
    /// most recent observations kept in the kernel matrix
    pub max_obs: usize,
}

impl Default for GpOpts {
    fn default() -> Self {
        Self {
            min_obs: crate::TPE_MIN_OBS,
            n_candidates: 64,
            acquisition: "ei".to_string(),
            length_scale: 0.2,
            noise: 1e-6,
            kappa: 1.96,
            xi: 0.01,
            max_obs: 128,
        }
    }
}

/// Gaussian-process sampler on the encoded unit cube: RBF kernel,
/// Cholesky posterior, acquisition maximized over random candidates.
/// scores fold through `losswise` so the acquisition always minimizes.
#[derive(Debug)]
pub struct Gp {
    opts: GpOpts,
    goal: Goal,
}

impl Gp {
    pub fn new(options: &serde_json::Value, goal: Goal) -> Result<Self> {
        let opts: GpOpts = super::decode(options)?;
        if !["ei", "ucb", "pi"].contains(&opts.acquisition.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "unknown acquisition {:?}; use \"ei\", \"ucb\" or \"pi\"",
                opts.acquisition
            )));
        }
        if !(opts.length_scale > 0. && opts.noise >= 0.) {
            return Err(Error::InvalidConfig(
                "gp needs length_scale > 0 and noise >= 0".into(),
            ));
        }
        if opts.n_candidates == 0 {
            return Err(Error::InvalidConfig(
                "gp n_candidates must be positive".into(),
            ));
        }
        Ok(Self { opts, goal })
    }

    fn rbf(&self, a: &[Unit], b: &[Unit]) -> f64 {
        let d2 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>();
        (-d2 / (2. * self.opts.length_scale.powi(2))).exp()
    }

    fn acquire(&self, mu: f64, sigma: f64, best: f64) -> f64 {
        let sigma = sigma.max(1e-9);
        match self.opts.acquisition.as_str() {
            "ucb" => -mu + self.opts.kappa * sigma,
            "pi" => math::norm_cdf((best - mu - self.opts.xi) / sigma),
            _ => {
                let improvement = best - mu - self.opts.xi;
                let z = improvement / sigma;
                improvement * math::norm_cdf(z) + sigma * math::norm_pdf(z)
            }
        }
    }
}

impl Sampler for Gp {
    fn next(
        &mut self,
        space: &SpaceFn,
        index: usize,
        history: &[Trial],
        stream: &mut Stream,
    ) -> Result<Params> {
        let spec = space(index);
        let scored = super::scored(history);
        if scored.len() < self.opts.min_obs {
            return Random.next(space, index, history, stream);
        }
        let mut rows = scored
            .iter()
            .filter_map(|t| {
                let y = self.goal.losswise(t.finite()?);
                spec.encode(&t.params).ok().map(|x| (x, y))
            })
            .collect::<Vec<_>>();
        if rows.len() < self.opts.min_obs {
            return Random.next(space, index, history, stream);
        }
        if rows.len() > self.opts.max_obs {
            rows.drain(..rows.len() - self.opts.max_obs);
        }
        let n = rows.len();
        // standardized targets keep the kernel scales honest
        let raw = rows.iter().map(|(_, y)| *y).collect::<Vec<_>>();
        let (m, s) = (math::mean(&raw), math::std(&raw).max(crate::DENOM_FLOOR));
        let y = raw.iter().map(|v| (v - m) / s).collect::<Vec<_>>();
        let mut kernel = vec![vec![0.; n]; n];
        for i in 0..n {
            for j in 0..n {
                kernel[i][j] = self.rbf(&rows[i].0, &rows[j].0);
            }
            kernel[i][i] += self.opts.noise + 1e-8;
        }
        let Some(l) = math::cholesky(&kernel) else {
            // degenerate kernel, e.g. duplicated rows at zero noise
            return Random.next(space, index, history, stream);
        };
        let alpha = math::chol_solve(&l, &y);
        let best = y.iter().cloned().fold(f64::INFINITY, f64::min);
        let dims = spec.dims();
        let mut winner: Option<(Vec<Unit>, f64)> = None;
        for _ in 0..self.opts.n_candidates {
            let u = (0..dims).map(|_| stream.unit()).collect::<Vec<_>>();
            let k_star = rows.iter().map(|(x, _)| self.rbf(&u, x)).collect::<Vec<_>>();
            let mu = k_star.iter().zip(alpha.iter()).map(|(a, b)| a * b).sum::<f64>();
            let v = math::forward_solve(&l, &k_star);
            let var = (1. + self.opts.noise - v.iter().map(|x| x * x).sum::<f64>()).max(0.);
            let score = self.acquire(mu, var.sqrt(), best);
            if winner.as_ref().is_none_or(|(_, top)| score > *top) {
                winner = Some((u, score));
            }
        }
        let (u, _) = winner.expect("at least one candidate");
        Ok(spec.decode(&u))
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
    fn warms_up_with_random() {
        let mut gp = Gp::new(&serde_json::Value::Null, Goal::Minimize).unwrap();
        let ref mut a = Stream::for_trial(1, 0);
        let ref mut b = Stream::for_trial(1, 0);
        assert_eq!(
            gp.next(&space(), 0, &[], a).unwrap(),
            Random.next(&space(), 0, &[], b).unwrap()
        );
    }

    #[test]
    fn exploits_the_observed_minimum() {
        let history = (0..16)
            .map(|i| {
                let x = i as f64 / 15.;
                trial(x, (x - 0.7).powi(2))
            })
            .collect::<Vec<_>>();
        let mut gp = Gp::new(&serde_json::json!({"n_candidates": 256}), Goal::Minimize).unwrap();
        let ref mut stream = Stream::for_trial(42, 16);
        let proposed = gp.next(&space(), 16, &history, stream).unwrap();
        let x = proposed["x"].as_f64().unwrap();
        assert!((x - 0.7).abs() < 0.3, "proposal {} ignores the optimum", x);
    }

    #[test]
    fn ucb_and_pi_also_run() {
        let history = (0..12)
            .map(|i| trial(i as f64 / 11., (i as f64 / 11. - 0.4).powi(2)))
            .collect::<Vec<_>>();
        for acq in ["ucb", "pi"] {
            let mut gp =
                Gp::new(&serde_json::json!({"acquisition": acq}), Goal::Minimize).unwrap();
            let ref mut stream = Stream::for_trial(5, 12);
            let proposed = gp.next(&space(), 12, &history, stream).unwrap();
            let x = proposed["x"].as_f64().unwrap();
            assert!((0. ..=1.).contains(&x));
        }
    }

    #[test]
    fn unknown_acquisition_is_rejected() {
        assert!(Gp::new(&serde_json::json!({"acquisition": "thompson"}), Goal::Minimize).is_err());
    }
}
