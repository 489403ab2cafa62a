use super::Sampler;
use crate::error::Error;
use crate::error::Result;
use crate::rng;
use crate::rng::Stream;
use crate::space::Params;
use crate::space::SpaceFn;
use crate::study::Trial;
use crate::Seed;
use crate::Unit;
use serde::Deserialize;

/// direction-number table rows cover this many Sobol dimensions
/// (van der Corput plus the tabulated polynomials).
const SOBOL_MAX_DIMS: usize = 17;

/// primitive polynomials and initial direction numbers for Sobol
/// dimensions 2..=17, the leading rows of the Joe-Kuo table:
/// (degree, coefficients, m_1..m_s).
#[rustfmt::skip]
const SOBOL_TABLE: &[(u32, u32, &[u32])] = &[
    (1,  0, &[1]),
    (2,  1, &[1, 3]),
    (3,  1, &[1, 3, 1]),
    (3,  2, &[1, 1, 1]),
    (4,  1, &[1, 1, 3, 3]),
    (4,  4, &[1, 3, 5, 13]),
    (5,  2, &[1, 1, 5, 5, 17]),
    (5,  4, &[1, 1, 5, 5, 5]),
    (5,  7, &[1, 1, 7, 11, 19]),
    (5, 11, &[1, 1, 5, 1, 1]),
    (5, 13, &[1, 1, 1, 3, 11]),
    (5, 14, &[1, 3, 5, 5, 31]),
    (6,  1, &[1, 3, 3, 9, 7, 49]),
    (6, 13, &[1, 1, 1, 15, 21, 21]),
    (6, 16, &[1, 3, 1, 13, 27, 49]),
];

const PRIMES: &[usize] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113,
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QmcOpts {
    /// "sobol", "halton" or "lhs"
    pub kind: String,
    /// latin-hypercube block size
    pub samples: usize,
}

impl Default for QmcOpts {
    fn default() -> Self {
        Self {
            kind: "sobol".to_string(),
            samples: 16,
        }
    }
}

/// low-discrepancy sequences over the unit cube, decoded per
/// parameter. the trial index addresses the sequence directly, so
/// parallel coordinators get the same points in any order.
#[derive(Debug)]
pub struct Qmc {
    opts: QmcOpts,
    seed: Seed,
}

impl Qmc {
    pub fn new(options: &serde_json::Value, seed: Seed) -> Result<Self> {
        let opts: QmcOpts = super::decode(options)?;
        if !["sobol", "halton", "lhs"].contains(&opts.kind.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "unknown qmc kind {:?}; use \"sobol\", \"halton\" or \"lhs\"",
            opts.kind
            )));
        }
        if opts.samples < 2 {
            return Err(Error::InvalidConfig(
                "qmc samples must be at least 2".into(),
            ));
        }
        Ok(Self { opts, seed })
    }

    fn point(&self, index: usize, dims: usize, stream: &mut Stream) -> Vec<Unit> {
        match self.opts.kind.as_str() {
            "halton" => self.halton(index, dims),
            "lhs" => self.latin(index, dims, stream),
            _ if dims > SOBOL_MAX_DIMS => {
                log::warn!(
                    "sobol table covers {} dimensions, space has {}; using halton",
                    SOBOL_MAX_DIMS,
                    dims
                );
                self.halton(index, dims)
            }
            _ => self.sobol(index, dims),
        }
    }

    /// gray-code Sobol point `index + 1` (the all-zero point is skipped).
    fn sobol(&self, index: usize, dims: usize) -> Vec<Unit> {
        let gray = {
            let i = (index + 1) as u64;
            i ^ (i >> 1)
        };
        (0..dims)
            .map(|d| {
                let mut x = 0u32;
                for bit in 0..32 {
                    if gray >> bit & 1 == 1 {
                        x ^= direction(d, bit);
                    }
                }
                x as f64 / (1u64 << 32) as f64
            })
            .collect()
    }

    /// radical-inverse Halton with a seed-derived burn-in offset.
    fn halton(&self, index: usize, dims: usize) -> Vec<Unit> {
        let offset = (self.seed % 997) as usize + 1;
        (0..dims)
            .map(|d| {
                let base = PRIMES[d % PRIMES.len()];
                let mut i = index + offset;
                let mut inverse = 0.;
                let mut fraction = 1. / base as f64;
                while i > 0 {
                    inverse += (i % base) as f64 * fraction;
                    i /= base;
                    fraction /= base as f64;
                }
                inverse
            })
            .collect()
    }

    /// latin hypercube in blocks of `samples`: each block covers every
    /// stratum of every dimension exactly once, jittered within cells.
    fn latin(&self, index: usize, dims: usize, stream: &mut Stream) -> Vec<Unit> {
        let n = self.opts.samples;
        let block = index / n;
        let position = index % n;
        (0..dims)
            .map(|d| {
                let ref mut perm_stream =
                    Stream::from_seed(rng::derive(self.seed, block * 8192 + d));
                let mut perm = (0..n).collect::<Vec<_>>();
                perm_stream.shuffle(&mut perm);
                (perm[position] as f64 + stream.unit()) / n as f64
            })
            .collect()
    }
}

impl Sampler for Qmc {
    fn next(
        &mut self,
        space: &SpaceFn,
        index: usize,
        _history: &[Trial],
        stream: &mut Stream,
    ) -> Result<Params> {
        let spec = space(index);
        let point = self.point(index, spec.dims(), stream);
        Ok(spec.decode(&point))
    }
}

/// direction number for (dimension, bit). dimension 0 is plain van
/// der Corput; the rest run the usual recurrence over the table row.
fn direction(dim: usize, bit: usize) -> u32 {
    if dim == 0 {
        return 1u32 << (31 - bit);
    }
    let (degree, coefficients, m) = SOBOL_TABLE[dim - 1];
    let s = degree as usize;
    let mut v = vec![0u32; 32];
    for k in 0..s {
        v[k] = m[k] << (31 - k);
    }
    for k in s..32 {
        let mut next = v[k - s] ^ (v[k - s] >> s);
        for i in 1..s {
            if coefficients >> (s - 1 - i) & 1 == 1 {
                next ^= v[k - i];
            }
        }
        v[k] = next;
    }
    v[bit]
}
