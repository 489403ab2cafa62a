use super::Sampler;
use crate::error::Result;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::SpaceFn;
use crate::study::Trial;

/// independent draws per parameter. the baseline sampler, and the
/// warm-up phase every model-based sampler falls back to.
#[derive(Debug)]
pub struct Random;

impl Sampler for Random {
    fn next(
        &mut self,
        space: &SpaceFn,
        index: usize,
        _history: &[Trial],
        stream: &mut Stream,
    ) -> Result<Params> {
        Ok(space(index).sample(stream))
    }
}
