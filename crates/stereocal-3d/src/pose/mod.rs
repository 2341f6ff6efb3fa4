mod essential;
pub use essential::*;

mod fundamental;
pub use fundamental::*;

mod homography;
pub use homography::*;

/// Normalize points to zero mean and an average distance of sqrt(2) from the origin.
///
/// Returns the normalized points and the similarity transform `T` with `x_n = T * x`.
pub(crate) fn normalize_points_2d(x: &[[f64; 2]]) -> (Vec<[f64; 2]>, [[f64; 3]; 3]) {
    let n = x.len().max(1) as f64;
    let (sx, sy) = x.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p[0], acc.1 + p[1]));
    let (mx, my) = (sx / n, sy / n);

    let mean_dist = x
        .iter()
        .map(|p| ((p[0] - mx).powi(2) + (p[1] - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > f64::EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let xn = x
        .iter()
        .map(|p| [s * (p[0] - mx), s * (p[1] - my)])
        .collect();
    let t = [[s, 0.0, -s * mx], [0.0, s, -s * my], [0.0, 0.0, 1.0]];
    (xn, t)
}
