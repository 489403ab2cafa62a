use super::stats;
use crate::rng::Stream;

/// univariate kernel density estimate on a bounded range, used by
/// TPE for the good/bad split models. every component is a truncated
/// Gaussian renormalized over [lo, hi] so the density integrates to
/// one, and a weak prior kernel plus a uniform blend keep it strictly
/// positive and stable at small sample counts.
#[derive(Debug, Clone)]
pub struct Kde {
    lo: f64,
    hi: f64,
    components: Vec<(f64, f64)>, // (center, sigma)
}

impl Kde {
    pub fn fit(samples: &[f64], lo: f64, hi: f64) -> Self {
        Self::with_factor(samples, lo, hi, crate::KDE_SCOTT_FACTOR)
    }

    pub fn with_factor(samples: &[f64], lo: f64, hi: f64, factor: f64) -> Self {
        let span = hi - lo;
        let prior = ((lo + hi) / 2., crate::KDE_PRIOR_WIDTH * span);
        let mut components = Vec::with_capacity(samples.len() + 1);
        if !samples.is_empty() {
            // Scott's rule, floored so identical samples don't collapse
            let n = samples.len() as f64;
            let sigma = (factor * stats::std(samples) * n.powf(-0.2))
                .max(span * crate::KDE_BANDWIDTH_FLOOR);
            components.extend(samples.iter().map(|&x| (x, sigma)));
        }
        components.push(prior);
        Self { lo, hi, components }
    }

    /// strictly positive density on [lo, hi]; integrates to 1 there.
    pub fn pdf(&self, x: f64) -> f64 {
        let k = self.components.len() as f64;
        let mixture = self
            .components
            .iter()
            .map(|&(c, s)| self.component_pdf(x, c, s))
            .sum::<f64>()
            / k;
        let uniform = 1. / (self.hi - self.lo);
        ((1. - crate::KDE_UNIFORM_BLEND) * mixture + crate::KDE_UNIFORM_BLEND * uniform)
            .max(crate::PROB_FLOOR)
    }

    /// draw from the mixture: uniform component choice, truncated
    /// normal by bounded rejection, clamp as last resort.
    pub fn sample(&self, stream: &mut Stream) -> f64 {
        let &(c, s) = stream.choice(&self.components);
        for _ in 0..16 {
            let x = stream.normal(c, s);
            if (self.lo..=self.hi).contains(&x) {
                return x;
            }
        }
        stream.normal(c, s).clamp(self.lo, self.hi)
    }

    fn component_pdf(&self, x: f64, c: f64, s: f64) -> f64 {
        let z = (x - c) / s;
        let mass = stats::norm_cdf((self.hi - c) / s) - stats::norm_cdf((self.lo - c) / s);
        stats::norm_pdf(z) / s / mass.max(crate::DENOM_FLOOR)
    }
}
