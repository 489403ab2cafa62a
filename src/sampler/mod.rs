mod bandit;
mod cmaes;
mod gp;
mod grid;
mod multivariate;
mod nsga;
mod qmc;
mod random;
mod tpe;

pub use bandit::*;
pub use cmaes::*;
pub use gp::*;
pub use grid::*;
pub use multivariate::*;
pub use nsga::*;
pub use qmc::*;
pub use random::*;
pub use tpe::*;

use crate::error::Error;
use crate::error::Result;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::SpaceFn;
use crate::study::Goal;
use crate::study::Trial;
use crate::Seed;

/// proposal algorithms. `next` reads the finished-trial history and
/// proposes the parameter map for trial `index`; `&mut self` carries
/// whatever internal state the algorithm evolves. all randomness
/// comes through the caller's stream.
pub trait Sampler: Send + Sync + std::fmt::Debug {
    fn next(
        &mut self,
        space: &SpaceFn,
        index: usize,
        history: &[Trial],
        stream: &mut Stream,
    ) -> Result<Params>;
}

pub const SAMPLERS: &[&str] = &[
    "random",
    "grid",
    "tpe",
    "tpe_multivariate",
    "cmaes",
    "nsga2",
    "qmc",
    "gp",
    "bandit",
];

/// the closed sampler whitelist. `seed` is the study's explicit
/// master seed when the caller fixed one; samplers that want
/// deterministic tie-breaking key off it.
pub fn build(
    name: &str,
    options: &serde_json::Value,
    goal: Goal,
    seed: Option<Seed>,
) -> Result<Box<dyn Sampler>> {
    match name {
        "random" => Ok(Box::new(Random)),
        "grid" => Ok(Box::new(Grid::new(options)?)),
        "tpe" => Ok(Box::new(Tpe::new(options, goal, seed)?)),
        "tpe_multivariate" => Ok(Box::new(MultiTpe::new(options, goal)?)),
        "cmaes" => Ok(Box::new(Cmaes::new(options, goal)?)),
        "nsga2" => Ok(Box::new(Nsga2::new(options, goal)?)),
        "qmc" => Ok(Box::new(Qmc::new(options, seed.unwrap_or(0))?)),
        "gp" => Ok(Box::new(Gp::new(options, goal)?)),
        "bandit" => Ok(Box::new(Bandit::new(options, goal)?)),
        other => Err(Error::InvalidConfig(format!(
            "unknown sampler {:?}; pick one of {}",
            other,
            SAMPLERS.join(", ")
        ))),
    }
}

/// decode a sampler/pruner options map, treating null as defaults.
pub(crate) fn decode<T>(options: &serde_json::Value) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match options {
        serde_json::Value::Null => Ok(T::default()),
        value => serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidConfig(format!("bad options: {}", e))),
    }
}

/// history with finite final scores, the only rows model-based
/// samplers are allowed to learn from.
pub(crate) fn scored(history: &[Trial]) -> Vec<&Trial> {
    history.iter().filter(|t| t.finite().is_some()).collect()
}

/// best-first quality split shared by the TPE family: top gamma
/// fraction (never empty) against the rest.
pub(crate) fn split<'t>(
    goal: Goal,
    gamma: f64,
    scored: &[&'t Trial],
) -> (Vec<&'t Trial>, Vec<&'t Trial>) {
    let mut sorted = scored.to_vec();
    sorted.sort_by(|a, b| {
        let a = goal.losswise(a.finite().unwrap_or(f64::INFINITY));
        let b = goal.losswise(b.finite().unwrap_or(f64::INFINITY));
        a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
    });
    let n_good = ((gamma * sorted.len() as f64).floor() as usize).max(1);
    let bad = sorted.split_off(n_good.min(sorted.len()));
    (sorted, bad)
}
