/// scalar statistics kernels shared across samplers and pruners.

/// Abramowitz-Stegun 7.1.26 rational approximation, max relative
/// error 1.5e-7 over the real line.
pub fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;
    let sign = if x < 0. { -1. } else { 1. };
    let x = x.abs();
    let t = 1. / (1. + P * x);
    let y = 1. - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1. + erf(x / std::f64::consts::SQRT_2))
}

pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2. * std::f64::consts::PI).sqrt()
}

pub fn mean(xs: &[f64]) -> f64 {
    match xs.len() {
        0 => 0.,
        n => xs.iter().sum::<f64>() / n as f64,
    }
}

/// population standard deviation.
pub fn std(xs: &[f64]) -> f64 {
    match xs.len() {
        0 => 0.,
        n => {
            let m = mean(xs);
            (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n as f64).sqrt()
        }
    }
}

/// p-th percentile of a sorted slice with linear interpolation:
/// k = p (m - 1) / 100, cutoff between the straddling ranks.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let m = sorted.len();
    if m == 1 {
        return sorted[0];
    }
    let k = p.clamp(0., 100.) * (m - 1) as f64 / 100.;
    let lo = k.floor() as usize;
    let hi = k.ceil() as usize;
    sorted[lo] + (k - lo as f64) * (sorted[hi] - sorted[lo])
}

/// sample Pearson correlation, clamped into [-1, 1].
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len();
    if n < 2 {
        return 0.;
    }
    let mx = mean(xs);
    let my = mean(ys);
    let mut cov = 0.;
    let mut vx = 0.;
    let mut vy = 0.;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    let denom = (vx * vy).sqrt();
    if denom < crate::DENOM_FLOOR {
        return 0.;
    }
    (cov / denom).clamp(-1., 1.)
}

/// sample correlation matrix of column vectors; identity when fewer
/// than 3 rows make the estimate meaningless.
pub fn correlation(columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let d = columns.len();
    let n = columns.first().map_or(0, |c| c.len());
    let mut matrix = vec![vec![0.; d]; d];
    for (i, row) in matrix.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = match (i == j, n < 3) {
                (true, _) => 1.,
                (false, true) => 0.,
                (false, false) => pearson(&columns[i], &columns[j]),
            };
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erf_matches_reference_values() {
        // reference values from the NIST tables
        for (x, want) in [
            (0.0, 0.0),
            (0.5, 0.5204998778),
            (1.0, 0.8427007929),
            (2.0, 0.9953222650),
            (3.0, 0.9999779095),
        ] {
            assert!((erf(x) - want).abs() < 1.5e-7, "erf({})", x);
            assert!((erf(-x) + want).abs() < 1.5e-7, "erf(-{})", x);
        }
    }

    #[test]
    fn norm_cdf_is_symmetric() {
        assert!((norm_cdf(0.) - 0.5).abs() < 1e-12);
        for x in [0.5, 1., 1.96, 3.] {
            assert!((norm_cdf(x) + norm_cdf(-x) - 1.).abs() < 1e-7);
        }
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-3);
    }

    #[test]
    fn percentile_fifty_is_the_median() {
        let sorted = [1., 2., 3., 4., 5.];
        assert_eq!(percentile(&sorted, 50.), 3.);
        let sorted = [1., 2., 3., 4.];
        assert_eq!(percentile(&sorted, 50.), 2.5);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [10., 20., 30., 40.];
        // k = 25 * 3 / 100 = 0.75
        assert!((percentile(&sorted, 25.) - 17.5).abs() < 1e-12);
        assert_eq!(percentile(&sorted, 0.), 10.);
        assert_eq!(percentile(&sorted, 100.), 40.);
    }

    #[test]
    fn pearson_detects_sign() {
        let xs = [1., 2., 3., 4., 5.];
        let ys = [2., 4., 6., 8., 10.];
        let zs = [10., 8., 6., 4., 2.];
        assert!((pearson(&xs, &ys) - 1.).abs() < 1e-12);
        assert!((pearson(&xs, &zs) + 1.).abs() < 1e-12);
        assert_eq!(pearson(&[1., 1., 1.], &[1., 2., 3.]), 0.);
    }

    #[test]
    fn correlation_is_identity_below_three_rows() {
        let cols = vec![vec![0.1, 0.9], vec![0.2, 0.8]];
        let matrix = correlation(&cols);
        assert_eq!(matrix, vec![vec![1., 0.], vec![0., 1.]]);
    }
}
