use super::Sampler;
use crate::error::Error;
use crate::error::Result;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::Space;
use crate::space::SpaceFn;
use crate::space::Spec;
use crate::space::Value;
use crate::study::Trial;
use serde::Deserialize;

/// hard cap on the cartesian product so a careless space cannot eat
/// the heap when shuffling.
const GRID_LIMIT: usize = 1 << 22;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridOpts {
    pub n_points: usize,
    pub shuffle: bool,
}

impl Default for GridOpts {
    fn default() -> Self {
        Self {
            n_points: 8,
            shuffle: false,
        }
    }
}

/// exhaustive sweep over discretised parameter domains in a stable
/// order, repeating once the product is spent. an optional shuffle
/// fixes a single permutation at first call.
#[derive(Debug)]
pub struct Grid {
    opts: GridOpts,
    perm: Option<Vec<usize>>,
}

impl Grid {
    pub fn new(options: &serde_json::Value) -> Result<Self> {
        let opts: GridOpts = super::decode(options)?;
        if opts.n_points < 2 {
            return Err(Error::InvalidConfig(
                "grid n_points must be at least 2".into(),
            ));
        }
        Ok(Self { opts, perm: None })
    }

    /// discretise one axis. continuous axes spread `n_points` evenly
    /// (log axes in log space); integers span their range; choices
    /// enumerate.
    fn axis(&self, spec: &Spec) -> Vec<Value> {
        let n = self.opts.n_points;
        match spec {
            Spec::Uniform { lo, hi } => (0..n)
                .map(|i| Value::Real(lo + (hi - lo) * i as f64 / (n - 1) as f64))
                .collect(),
            Spec::LogUniform { lo, hi } => (0..n)
                .map(|i| {
                    Value::Real((lo.ln() + (hi.ln() - lo.ln()) * i as f64 / (n - 1) as f64).exp())
                })
                .collect(),
            Spec::Int { lo, hi } => {
                let span = (hi - lo + 1) as usize;
                if span <= n {
                    (*lo..=*hi).map(Value::Int).collect()
                } else {
                    let mut picked = (0..n)
                        .map(|i| lo + ((hi - lo) as f64 * i as f64 / (n - 1) as f64).round() as i64)
                        .collect::<Vec<_>>();
                    picked.dedup();
                    picked.into_iter().map(Value::Int).collect()
                }
            }
            Spec::Choice { choices } => choices.clone(),
            Spec::Discrete { lo, hi, step } => {
                let rungs = ((hi - lo) / step).floor() as usize + 1;
                if rungs <= n {
                    (0..rungs)
                        .map(|i| Value::Real(lo + i as f64 * step))
                        .collect()
                } else {
                    (0..n)
                        .map(|i| {
                            let k = ((rungs - 1) as f64 * i as f64 / (n - 1) as f64).round();
                            Value::Real(lo + k * step)
                        })
                        .collect()
                }
            }
        }
    }

    fn axes(&self, space: &Space) -> Vec<(String, Vec<Value>)> {
        space
            .iter()
            .map(|(name, spec)| (name.clone(), self.axis(spec)))
            .collect()
    }
}

impl Sampler for Grid {
    fn next(
        &mut self,
        space: &SpaceFn,
        index: usize,
        _history: &[Trial],
        stream: &mut Stream,
    ) -> Result<Params> {
        let axes = self.axes(&space(index));
        let total = axes
            .iter()
            .try_fold(1usize, |acc, (_, axis)| acc.checked_mul(axis.len()))
            .filter(|&total| total > 0 && total <= GRID_LIMIT)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "grid product exceeds {} cells; shrink n_points",
                    GRID_LIMIT
                ))
            })?;
        if self.opts.shuffle && self.perm.is_none() {
            let mut perm = (0..total).collect::<Vec<_>>();
            stream.shuffle(&mut perm);
            self.perm = Some(perm);
        }
        let cell = match &self.perm {
            Some(perm) if perm.len() == total => perm[index % total],
            _ => index % total,
        };
        let mut rest = cell;
        let params = axes
            .into_iter()
            .map(|(name, axis)| {
                let digit = rest % axis.len();
                rest /= axis.len();
                (name, axis[digit].clone())
            })
            .collect();
        Ok(params)
    }
}
