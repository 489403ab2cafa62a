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
pub struct NsgaOpts {
    /// parents drawn from the most recent finished trials
    pub population: usize,
    pub crossover_eta: f64,
    pub mutation_eta: f64,
    pub crossover_prob: f64,
    /// per-dimension mutation probability; defaults to 1/d
    pub mutation_prob: Option<f64>,
    /// extra objective metric names; "max:" / "min:" prefixes flip
    /// direction, bare names inherit the study goal
    pub objectives: Vec<String>,
}

impl Default for NsgaOpts {
    fn default() -> Self {
        Self {
            population: 24,
            crossover_eta: 15.,
            mutation_eta: 20.,
            crossover_prob: 0.9,
            mutation_prob: None,
            objectives: vec![],
        }
    }
}

/// NSGA-II: non-dominated sorting over the objective vectors,
/// crowding-distance diversity, binary tournament selection, SBX
/// crossover and polynomial mutation in the encoded unit cube.
#[derive(Debug)]
pub struct Nsga2 {
    opts: NsgaOpts,
    goal: Goal,
}

struct Individual {
    point: Vec<Unit>,
    objectives: Vec<f64>,
}

impl Nsga2 {
    pub fn new(options: &serde_json::Value, goal: Goal) -> Result<Self> {
        let opts: NsgaOpts = super::decode(options)?;
        if opts.population < 2 {
            return Err(Error::InvalidConfig(
                "nsga2 population must be at least 2".into(),
            ));
        }
        Ok(Self { opts, goal })
    }

    /// everything is folded to minimization before sorting.
    fn objectives(&self, trial: &Trial) -> Option<Vec<f64>> {
        let mut folded = vec![self.goal.losswise(trial.finite()?)];
        for name in &self.opts.objectives {
            let value = match (name.strip_prefix("max:"), name.strip_prefix("min:")) {
                (Some(metric), _) => -*trial.metrics.get(metric)?,
                (_, Some(metric)) => *trial.metrics.get(metric)?,
                _ => self.goal.losswise(*trial.metrics.get(name.as_str())?),
            };
            if !value.is_finite() {
                return None;
            }
            folded.push(value);
        }
        Some(folded)
    }

    fn tournament<'p>(
        &self,
        pool: &'p [Individual],
        ranks: &[usize],
        crowding: &[f64],
        stream: &mut Stream,
    ) -> &'p Individual {
        let a = stream.index(pool.len());
        let b = stream.index(pool.len());
        let winner = match ranks[a].cmp(&ranks[b]) {
            std::cmp::Ordering::Less => a,
            std::cmp::Ordering::Greater => b,
            std::cmp::Ordering::Equal if crowding[a] >= crowding[b] => a,
            std::cmp::Ordering::Equal => b,
        };
        &pool[winner]
    }

    /// simulated binary crossover on one coordinate.
    fn sbx(&self, p1: f64, p2: f64, stream: &mut Stream) -> f64 {
        if stream.unit() >= self.opts.crossover_prob {
            return p1;
        }
        let u = stream.unit();
        let exponent = 1. / (self.opts.crossover_eta + 1.);
        let beta = if u <= 0.5 {
            (2. * u).powf(exponent)
        } else {
            (1. / (2. * (1. - u)).max(crate::DENOM_FLOOR)).powf(exponent)
        };
        0.5 * ((1. + beta) * p1 + (1. - beta) * p2)
    }

    /// polynomial mutation on one coordinate of the unit cube.
    fn mutate(&self, x: f64, prob: f64, stream: &mut Stream) -> f64 {
        if stream.unit() >= prob {
            return x;
        }
        let u = stream.unit();
        let exponent = 1. / (self.opts.mutation_eta + 1.);
        let delta = if u < 0.5 {
            (2. * u).powf(exponent) - 1.
        } else {
            1. - (2. * (1. - u)).powf(exponent)
        };
        x + delta
    }
}

impl Sampler for Nsga2 {
    fn next(
        &mut self,
        space: &SpaceFn,
        index: usize,
        history: &[Trial],
        stream: &mut Stream,
    ) -> Result<Params> {
        let spec = space(index);
        let pool = super::scored(history)
            .into_iter()
            .filter_map(|t| {
                Some(Individual {
                    point: spec.encode(&t.params).ok()?,
                    objectives: self.objectives(t)?,
                })
            })
            .collect::<Vec<_>>();
        let pool = match pool.len() {
            n if n > self.opts.population => {
                pool.into_iter().skip(n - self.opts.population).collect()
            }
            _ => pool,
        };
        if pool.len() < 2 {
            return Random.next(space, index, history, stream);
        }
        let objectives = pool.iter().map(|i| i.objectives.clone()).collect::<Vec<_>>();
        let ranks = ranks(&objectives);
        let crowding = crowding(&objectives, &ranks);
        let p1 = self.tournament(&pool, &ranks, &crowding, stream);
        let p2 = self.tournament(&pool, &ranks, &crowding, stream);
        let prob = self
            .opts
            .mutation_prob
            .unwrap_or(1. / spec.dims().max(1) as f64);
        let child = p1
            .point
            .iter()
            .zip(p2.point.iter())
            .map(|(&a, &b)| {
                let crossed = self.sbx(a, b, stream);
                self.mutate(crossed, prob, stream).clamp(0., 1.)
            })
            .collect::<Vec<_>>();
        Ok(spec.decode(&child))
    }
}

/// does `a` Pareto-dominate `b`? no worse everywhere, better somewhere.
fn dominates(a: &[f64], b: &[f64]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x <= y) && a.iter().zip(b.iter()).any(|(x, y)| x < y)
}

/// non-dominated front index per individual, 0 = Pareto front.
fn ranks(objectives: &[Vec<f64>]) -> Vec<usize> {
    let n = objectives.len();
    let mut dominated_by = vec![0usize; n];
    let mut dominating = vec![vec![]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j && dominates(&objectives[i], &objectives[j]) {
                dominating[i].push(j);
                dominated_by[j] += 1;
            }
        }
    }
    let mut rank = vec![0usize; n];
    let mut front = (0..n).filter(|&i| dominated_by[i] == 0).collect::<Vec<_>>();
    let mut depth = 0;
    while !front.is_empty() {
        let mut next = vec![];
        for &i in &front {
            rank[i] = depth;
            for &j in &dominating[i] {
                dominated_by[j] -= 1;
                if dominated_by[j] == 0 {
                    next.push(j);
                }
            }
        }
        front = next;
        depth += 1;
    }
    rank
}

/// crowding distance within each front; boundary points get infinity.
fn crowding(objectives: &[Vec<f64>], ranks: &[usize]) -> Vec<f64> {
    let n = objectives.len();
    let m = objectives.first().map_or(0, |o| o.len());
    let mut distance = vec![0.; n];
    let fronts = ranks.iter().max().map_or(0, |&d| d + 1);
    for front in 0..fronts {
        let members = (0..n).filter(|&i| ranks[i] == front).collect::<Vec<_>>();
        for k in 0..m {
            let mut order = members.clone();
            order.sort_by(|&a, &b| {
                objectives[a][k]
                    .partial_cmp(&objectives[b][k])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let lo = objectives[order[0]][k];
            let hi = objectives[order[order.len() - 1]][k];
            let span = (hi - lo).max(crate::DENOM_FLOOR);
            distance[order[0]] = f64::INFINITY;
            distance[order[order.len() - 1]] = f64::INFINITY;
            for w in order.windows(3) {
                distance[w[1]] += (objectives[w[2]][k] - objectives[w[0]][k]) / span;
            }
        }
    }
    distance
}
