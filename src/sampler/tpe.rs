use super::Random;
use super::Sampler;
use crate::error::Error;
use crate::error::Result;
use crate::math::Kde;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::Space;
use crate::space::SpaceFn;
use crate::space::Spec;
use crate::space::Value;
use crate::study::Goal;
use crate::study::Trial;
use crate::Seed;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TpeOpts {
    pub min_obs: usize,
    pub gamma: f64,
    pub n_candidates: usize,
}

impl Default for TpeOpts {
    fn default() -> Self {
        Self {
            min_obs: crate::TPE_MIN_OBS,
            gamma: crate::TPE_GAMMA,
            n_candidates: crate::TPE_CANDIDATES,
        }
    }
}

/// Tree-structured Parzen Estimator, univariate form. finished
/// trials split into a good head and a bad tail; every parameter
/// gets a density model per side; candidates drawn from the good
/// side are ranked by the likelihood ratio, the standard proxy for
/// expected improvement.
#[derive(Debug)]
pub struct Tpe {
    opts: TpeOpts,
    goal: Goal,
    seed: Option<Seed>,
}

/// per-parameter good/bad density pair. numeric axes share the KDE
/// machinery (log axes modeled in log space); categorical axes use
/// Laplace-smoothed frequencies.
enum Model {
    Numeric {
        good: Kde,
        bad: Kde,
        log: bool,
        spec: Spec,
    },
    Categorical {
        good: Vec<f64>,
        bad: Vec<f64>,
        choices: Vec<Value>,
    },
}

impl Tpe {
    pub fn new(options: &serde_json::Value, goal: Goal, seed: Option<Seed>) -> Result<Self> {
        let opts: TpeOpts = super::decode(options)?;
        if !(0. < opts.gamma && opts.gamma <= 1.) {
            return Err(Error::InvalidConfig(format!(
                "tpe gamma must sit in (0, 1], got {}",
                opts.gamma
            )));
        }
        if opts.n_candidates == 0 {
            return Err(Error::InvalidConfig(
                "tpe n_candidates must be positive".into(),
            ));
        }
        Ok(Self { opts, goal, seed })
    }
}

fn models(space: &Space, good: &[&Trial], bad: &[&Trial]) -> Vec<(String, Model)> {
    space
        .iter()
        .map(|(name, spec)| (name.clone(), model(name, spec, good, bad)))
        .collect()
}

fn model(name: &str, spec: &Spec, good: &[&Trial], bad: &[&Trial]) -> Model {
    match spec {
        Spec::Choice { choices } => Model::Categorical {
            good: frequencies(name, choices, good),
            bad: frequencies(name, choices, bad),
            choices: choices.clone(),
        },
        _ => {
            let (lo, hi, log) = domain(spec);
            Model::Numeric {
                good: Kde::fit(&collect(name, log, good), lo, hi),
                bad: Kde::fit(&collect(name, log, bad), lo, hi),
                log,
                spec: spec.clone(),
            }
        }
    }
}

fn propose(models: &[(String, Model)], stream: &mut Stream) -> Params {
    models
        .iter()
        .map(|(name, model)| {
            let value = match model {
                Model::Numeric { good, log, spec, .. } => {
                    let x = good.sample(stream);
                    spec.constrain(if *log { x.exp() } else { x })
                }
                Model::Categorical { good, choices, .. } => {
                    choices[weighted(good, stream)].clone()
                }
            };
            (name.clone(), value)
        })
        .collect()
}

/// sum of per-parameter log likelihood ratios.
fn score(models: &[(String, Model)], params: &Params) -> f64 {
    models
        .iter()
        .map(|(name, model)| match model {
            Model::Numeric { good, bad, log, .. } => {
                match params.get(name).and_then(Value::as_f64) {
                    None => 0.,
                    Some(x) => {
                        let x = if *log { x.max(crate::LOG_FLOOR).ln() } else { x };
                        ratio(good.pdf(x), bad.pdf(x))
                    }
                }
            }
            Model::Categorical { good, bad, choices } => {
                match params.get(name).and_then(|v| choices.iter().position(|c| c == v)) {
                    None => 0.,
                    Some(i) => ratio(good[i], bad[i]),
                }
            }
        })
        .sum()
}

impl Sampler for Tpe {
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
        let (good, bad) = super::split(self.goal, self.opts.gamma, &scored);
        let models = models(&spec, &good, &bad);
        let candidates = (0..self.opts.n_candidates)
            .map(|_| propose(&models, stream))
            .collect::<Vec<_>>();
        let mut scores = candidates
            .par_iter()
            .map(|params| score(&models, params))
            .collect::<Vec<_>>();
        if self.seed.is_some() {
            // deterministic tie-breaking, far below any real signal
            for score in scores.iter_mut() {
                *score += stream.unit() * crate::TPE_TIE_JITTER;
            }
        }
        let winner = scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        Ok(candidates.into_iter().nth(winner).unwrap_or_default())
    }
}

fn ratio(p_good: f64, p_bad: f64) -> f64 {
    (p_good.max(crate::PROB_FLOOR)).ln() - (p_bad.max(crate::PROB_FLOOR)).ln()
}

/// numeric domain per spec, log axes folded into log space.
fn domain(spec: &Spec) -> (f64, f64, bool) {
    match spec {
        Spec::Uniform { lo, hi } => (*lo, *hi, false),
        Spec::LogUniform { lo, hi } => (lo.ln(), hi.ln(), true),
        Spec::Int { lo, hi } => (*lo as f64, *hi as f64, false),
        Spec::Discrete { lo, hi, .. } => (*lo, *hi, false),
        Spec::Choice { .. } => unreachable!("categorical axes use frequencies"),
    }
}

fn collect(name: &str, log: bool, trials: &[&Trial]) -> Vec<f64> {
    trials
        .iter()
        .filter_map(|t| t.params.get(name))
        .filter_map(Value::as_f64)
        .map(|x| if log { x.max(crate::LOG_FLOOR).ln() } else { x })
        .collect()
}

/// Laplace-smoothed choice frequencies: (count + 1) / (n + k).
fn frequencies(name: &str, choices: &[Value], trials: &[&Trial]) -> Vec<f64> {
    let mut counts = vec![0usize; choices.len()];
    for trial in trials {
        if let Some(i) = trial
            .params
            .get(name)
            .and_then(|v| choices.iter().position(|c| c == v))
        {
            counts[i] += 1;
        }
    }
    let total = counts.iter().sum::<usize>();
    counts
        .iter()
        .map(|&c| (c + 1) as f64 / (total + choices.len()) as f64)
        .collect()
}

fn weighted(weights: &[f64], stream: &mut Stream) -> usize {
    let total = weights.iter().sum::<f64>().max(crate::DENOM_FLOOR);
    let mut draw = stream.unit() * total;
    for (i, w) in weights.iter().enumerate() {
        draw -= w;
        if draw <= 0. {
            return i;
        }
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Space;

    fn trial(x: f64, value: f64) -> Trial {
        let mut trial = Trial::new(Params::new(), 1);
        trial.params.insert("x".to_string(), Value::Real(x));
        trial.value = Some(value);
        trial.status = crate::study::TrialStatus::Completed;
        trial
    }

    fn space() -> SpaceFn {
        Space::new().uniform("x", -5., 5.).constant()
    }

    #[test]
    fn falls_back_to_random_below_min_obs() {
        let mut tpe = Tpe::new(&serde_json::Value::Null, Goal::Minimize, Some(42)).unwrap();
        let history = (0..3).map(|i| trial(i as f64, i as f64)).collect::<Vec<_>>();
        let ref mut a = Stream::for_trial(42, 3);
        let ref mut b = Stream::for_trial(42, 3);
        let proposed = tpe.next(&space(), 3, &history, a).unwrap();
        let random = Random.next(&space(), 3, &history, b).unwrap();
        assert_eq!(proposed, random);
    }

    #[test]
    fn concentrates_on_the_good_region() {
        // minimum near x = 2; good trials cluster there
        let history = (0..30)
            .map(|i| {
                let x = -5. + 10. * i as f64 / 29.;
                trial(x, (x - 2.).powi(2))
            })
            .collect::<Vec<_>>();
        let mut tpe = Tpe::new(&serde_json::Value::Null, Goal::Minimize, Some(42)).unwrap();
        let ref mut stream = Stream::for_trial(42, 30);
        let proposed = tpe.next(&space(), 30, &history, stream).unwrap();
        let x = proposed["x"].as_f64().unwrap();
        assert!((x - 2.).abs() < 2., "proposal {} strayed from the optimum", x);
    }

    #[test]
    fn respects_direction_when_maximizing() {
        let history = (0..30)
            .map(|i| {
                let x = -5. + 10. * i as f64 / 29.;
                trial(x, -(x - 2.).powi(2))
            })
            .collect::<Vec<_>>();
        let mut tpe = Tpe::new(&serde_json::Value::Null, Goal::Maximize, Some(42)).unwrap();
        let ref mut stream = Stream::for_trial(42, 30);
        let proposed = tpe.next(&space(), 30, &history, stream).unwrap();
        let x = proposed["x"].as_f64().unwrap();
        assert!((x - 2.).abs() < 2.);
    }

    #[test]
    fn skips_non_finite_history() {
        let mut history = (0..12).map(|i| trial(i as f64 - 5., 1.)).collect::<Vec<_>>();
        for t in history.iter_mut().take(6) {
            t.value = Some(f64::NAN);
        }
        let mut tpe = Tpe::new(
            &serde_json::json!({"min_obs": 4}),
            Goal::Minimize,
            Some(42),
        )
        .unwrap();
        let ref mut stream = Stream::for_trial(42, 12);
        // six finite rows remain; the model path must not choke
        let proposed = tpe.next(&space(), 12, &history, stream).unwrap();
        assert!(proposed.contains_key("x"));
    }

    #[test]
    fn all_nan_history_reverts_to_random() {
        let history = (0..20)
            .map(|i| {
                let mut t = trial(i as f64 - 10., f64::NAN);
                t.value = Some(f64::NAN);
                t
            })
            .collect::<Vec<_>>();
        let mut tpe = Tpe::new(&serde_json::Value::Null, Goal::Minimize, Some(42)).unwrap();
        let ref mut a = Stream::for_trial(42, 20);
        let ref mut b = Stream::for_trial(42, 20);
        let proposed = tpe.next(&space(), 20, &history, a).unwrap();
        let random = Random.next(&space(), 20, &history, b).unwrap();
        assert_eq!(proposed, random);
    }

    #[test]
    fn proposals_are_deterministic_given_the_stream() {
        let history = (0..20)
            .map(|i| {
                let x = -5. + 10. * i as f64 / 19.;
                trial(x, (x - 2.).powi(2))
            })
            .collect::<Vec<_>>();
        let mut tpe = Tpe::new(&serde_json::Value::Null, Goal::Minimize, Some(7)).unwrap();
        let ref mut a = Stream::for_trial(7, 20);
        let ref mut b = Stream::for_trial(7, 20);
        let pa = tpe.next(&space(), 20, &history, a).unwrap();
        let pb = tpe.next(&space(), 20, &history, b).unwrap();
        assert_eq!(pa, pb);
    }

    #[test]
    fn categorical_axes_follow_the_winners() {
        let space = Space::new()
            .choice("opt", vec!["sgd", "adam"])
            .constant();
        let history = (0..24)
            .map(|i| {
                let mut t = Trial::new(Params::new(), 1);
                let opt = if i % 2 == 0 { "adam" } else { "sgd" };
                t.params.insert("opt".to_string(), Value::from(opt));
                // adam trials always win
                t.value = Some(if opt == "adam" { 0. } else { 1. });
                t.status = crate::study::TrialStatus::Completed;
                t
            })
            .collect::<Vec<_>>();
        let mut tpe = Tpe::new(&serde_json::Value::Null, Goal::Minimize, Some(3)).unwrap();
        let ref mut stream = Stream::for_trial(3, 24);
        let proposed = tpe.next(&space, 24, &history, stream).unwrap();
        assert_eq!(proposed["opt"].as_text(), Some("adam"));
    }

    #[test]
    fn bad_gamma_is_rejected() {
        assert!(Tpe::new(&serde_json::json!({"gamma": 0.}), Goal::Minimize, None).is_err());
        assert!(Tpe::new(&serde_json::json!({"gamma": 1.5}), Goal::Minimize, None).is_err());
    }
}
