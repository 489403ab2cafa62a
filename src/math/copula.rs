use super::linalg;
use super::stats;
use crate::rng::Stream;
use crate::Unit;

/// Gaussian copula over the encoded unit cube, the dependence model
/// behind multivariate TPE. marginals are uniform by construction;
/// the correlation structure is estimated from encoded history and
/// candidate quality is scored with a product-kernel KDE over the
/// same points.
#[derive(Debug, Clone)]
pub struct Copula {
    dims: usize,
    points: Vec<Vec<Unit>>,
    rho: f64,    // exact pairwise correlation, d == 2 only
    shrink: f64, // one-factor loading for d > 2
    identity: bool,
    bandwidth: f64,
}

impl Copula {
    pub fn fit(dims: usize, points: Vec<Vec<Unit>>) -> Self {
        let n = points.len();
        let columns = (0..dims)
            .map(|d| points.iter().map(|row| row[d]).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let matrix = stats::correlation(&columns);
        let off_diagonal = matrix
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().enumerate().filter(move |(j, _)| i != *j))
            .map(|(_, &r)| r)
            .collect::<Vec<_>>();
        let identity = off_diagonal
            .iter()
            .all(|r| r.abs() < crate::CORR_IDENTITY_TOLERANCE);
        let rho = if dims == 2 { matrix[0][1] } else { 0. };
        // average-correlation shrinkage, clamped to a usable loading
        let shrink = stats::mean(&off_diagonal).clamp(0., 1. - crate::DENOM_FLOOR);
        // Scott's rule for the d-dimensional product kernel
        let bandwidth = match n {
            0 => 1.,
            n => (n as f64)
                .powf(-1. / (dims as f64 + 4.))
                .max(crate::KDE_BANDWIDTH_FLOOR),
        };
        Self {
            dims,
            points,
            rho,
            shrink,
            identity,
            bandwidth,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// independent normals, correlation structure, then the standard
    /// normal CDF back onto [0, 1]^d. when the correlation matrix is
    /// the identity the normals pass straight through.
    pub fn sample(&self, stream: &mut Stream) -> Vec<Unit> {
        let z = (0..self.dims)
            .map(|_| stream.normal(0., 1.))
            .collect::<Vec<_>>();
        let z = match (self.identity, self.dims) {
            (true, _) | (_, 0) | (_, 1) => z,
            (false, 2) => {
                let (a, b) = linalg::couple(self.rho, z[0], z[1]);
                vec![a, b]
            }
            (false, _) => {
                // one-factor approximation: shared draw loads every
                // coordinate with the average correlation
                let shared = stream.normal(0., 1.);
                let load = self.shrink.sqrt();
                let rest = (1. - self.shrink).sqrt();
                z.into_iter().map(|zi| load * shared + rest * zi).collect()
            }
        };
        z.into_iter().map(stats::norm_cdf).collect()
    }

    /// product-kernel KDE likelihood of an encoded point; uniform
    /// density when no history backs the model.
    pub fn pdf(&self, u: &[Unit]) -> f64 {
        if self.points.is_empty() {
            return 1.;
        }
        let h = self.bandwidth;
        let total = self
            .points
            .iter()
            .map(|row| {
                row.iter()
                    .zip(u.iter())
                    .map(|(&x, &q)| stats::norm_pdf((q - x) / h) / h)
                    .product::<f64>()
            })
            .sum::<f64>();
        (total / self.points.len() as f64).max(crate::PROB_FLOOR)
    }
}
