/// Returns the least-squares slope of `ys` against `xs`.
///
/// Returns zero when fewer than two points are given or all `xs` are
/// equal.
pub fn least_squares_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let inv_n = 1.0 / n as f64;
    let x_mean = xs[..n].iter().sum::<f64>() * inv_n;
    let y_mean = ys[..n].iter().sum::<f64>() * inv_n;
    let (cov, var) = xs[..n]
        .iter()
        .zip(&ys[..n])
        .fold((0.0, 0.0), |(cov, var), (x, y)| {
            let dx = x - x_mean;
            (cov + dx * (y - y_mean), var + dx * dx)
        });
    if var <= f64::EPSILON {
        0.0
    } else {
        cov / var
    }
}
