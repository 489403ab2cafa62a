use super::Random;
use super::Sampler;
use super::TpeOpts;
use crate::error::Result;
use crate::math::Copula;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::Space;
use crate::space::SpaceFn;
use crate::study::Goal;
use crate::study::Trial;
use crate::Unit;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;

/// multivariate TPE: the same good/bad quality split, but the two
/// sides become Gaussian copulas over the encoded unit cube, so
/// correlated parameters are proposed jointly instead of axis by
/// axis. candidate generation mixes exploitation of the good model,
/// contrast against the bad model, and uniform exploration.
#[derive(Debug)]
pub struct MultiTpe {
    opts: TpeOpts,
    goal: Goal,
}

impl MultiTpe {
    pub fn new(options: &serde_json::Value, goal: Goal) -> Result<Self> {
        let opts: TpeOpts = super::decode(options)?;
        if !(0. < opts.gamma && opts.gamma <= 1.) {
            return Err(crate::Error::InvalidConfig(format!(
                "tpe gamma must sit in (0, 1], got {}",
                opts.gamma
            )));
        }
        if opts.n_candidates == 0 {
            return Err(crate::Error::InvalidConfig(
                "tpe n_candidates must be positive".into(),
            ));
        }
        Ok(Self { opts, goal })
    }

    /// encoded rows for trials whose params fit the current space;
    /// trials from a drifted conditional space are skipped.
    fn rows(space: &Space, trials: &[&Trial]) -> Vec<Vec<Unit>> {
        trials
            .iter()
            .filter_map(|t| space.encode(&t.params).ok())
            .collect()
    }
}

impl Sampler for MultiTpe {
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
        let (good, bad) = super::split(self.goal, self.opts.gamma, &scored);
        let good = Copula::fit(dims, Self::rows(&spec, &good));
        let bad = Copula::fit(dims, Self::rows(&spec, &bad));
        let candidates = (0..self.opts.n_candidates)
            .map(|_| match stream.unit() {
                r if r < crate::TPE_MIX_GOOD => good.sample(stream),
                r if r < crate::TPE_MIX_GOOD + crate::TPE_MIX_BAD => bad.sample(stream),
                _ => (0..dims).map(|_| stream.unit()).collect(),
            })
            .collect::<Vec<_>>();
        let scores = candidates
            .par_iter()
            .map(|u| good.pdf(u).ln() - bad.pdf(u).ln())
            .collect::<Vec<_>>();
        let winner = scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        Ok(spec.decode(&candidates[winner]))
    }
}
