use crate::Seed;
use rand::rngs::SmallRng;
use rand::RngCore;
use rand::SeedableRng;

/// an explicit, isolated randomness stream. every operation in the
/// crate that consumes randomness takes one of these by `&mut`;
/// nothing reaches for a thread-local or process-global generator.
pub struct Stream(SmallRng);

impl Stream {
    pub fn from_seed(seed: Seed) -> Self {
        Self(SmallRng::from_seed(expand(seed)))
    }

    /// the stream for trial `index` of a study with master seed `master`.
    pub fn for_trial(master: Seed, index: usize) -> Self {
        Self::from_seed(super::derive(master, index))
    }

    /// uniform in [0, 1), 53 bits of mantissa.
    pub fn unit(&mut self) -> f64 {
        (self.0.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.unit()
    }

    pub fn log_uniform(&mut self, lo: f64, hi: f64) -> f64 {
        self.uniform(lo.ln(), hi.ln()).exp()
    }

    /// Box-Muller transform.
    pub fn normal(&mut self, mu: f64, sigma: f64) -> f64 {
        let u1 = self.unit().max(crate::LOG_FLOOR);
        let u2 = self.unit();
        let z = (-2. * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        mu + sigma * z
    }

    pub fn exp_rate(&mut self, lambda: f64) -> f64 {
        let u = self.unit().max(crate::LOG_FLOOR);
        -u.ln() / lambda
    }

    /// uniform index into 0..n.
    pub fn index(&mut self, n: usize) -> usize {
        debug_assert!(n > 0);
        ((self.unit() * n as f64) as usize).min(n - 1)
    }

    /// uniform integer in [lo, hi], both ends inclusive.
    pub fn range(&mut self, lo: i64, hi: i64) -> i64 {
        let span = (hi - lo + 1) as f64;
        lo + ((self.unit() * span) as i64).min(hi - lo)
    }

    pub fn choice<'a, T>(&mut self, xs: &'a [T]) -> &'a T {
        &xs[self.index(xs.len())]
    }

    /// Fisher-Yates.
    pub fn shuffle<T>(&mut self, xs: &mut [T]) {
        for i in (1..xs.len()).rev() {
            let j = self.index(i + 1);
            xs.swap(i, j);
        }
    }
}

/// SplitMix64 expansion of a 64-bit seed into the generator's full
/// 256-bit state, same recipe the reference xoshiro seeder uses.
fn expand(seed: Seed) -> [u8; 32] {
    const PHI: u64 = 0x9e3779b97f4a7c15;
    let mut state = seed;
    let mut out = [0u8; 32];
    for chunk in out.chunks_mut(8) {
        state = state.wrapping_add(PHI);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^= z >> 31;
        chunk.copy_from_slice(&z.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let ref mut a = Stream::from_seed(42);
        let ref mut b = Stream::from_seed(42);
        for _ in 0..256 {
            assert_eq!(a.unit(), b.unit());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let ref mut a = Stream::from_seed(42);
        let ref mut b = Stream::from_seed(43);
        let same = (0..64).filter(|_| a.unit() == b.unit()).count();
        assert_eq!(same, 0);
    }

    #[test]
    fn unit_stays_in_the_half_open_interval() {
        let ref mut stream = Stream::from_seed(1);
        for _ in 0..4096 {
            let u = stream.unit();
            assert!((0. ..1.).contains(&u));
        }
    }

    #[test]
    fn range_covers_both_endpoints() {
        let ref mut stream = Stream::from_seed(5);
        let draws = (0..2048).map(|_| stream.range(-2, 2)).collect::<Vec<_>>();
        for want in -2..=2 {
            assert!(draws.contains(&want), "never drew {}", want);
        }
        assert!(draws.iter().all(|x| (-2..=2).contains(x)));
    }

    #[test]
    fn normal_has_sane_moments() {
        let ref mut stream = Stream::from_seed(9);
        let n = 20_000;
        let draws = (0..n).map(|_| stream.normal(3., 2.)).collect::<Vec<_>>();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 3.).abs() < 0.1);
        assert!((var - 4.).abs() < 0.3);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let ref mut stream = Stream::from_seed(11);
        let mut xs = (0..32).collect::<Vec<_>>();
        stream.shuffle(&mut xs);
        let mut sorted = xs.clone();
        sorted.sort();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
    }
}
