use super::normalize_points_2d;
use crate::linalg::{det_mat33, mat33_inverse, mat33_mul, null_vector};
use crate::CalibError;

/// Estimate the homography mapping `src` onto `dst` with the normalized DLT.
///
/// All correspondences are used in a least squares sense; there is no outlier
/// rejection. The result is scaled so that `H[2][2] = 1`.
///
/// # Arguments
///
/// * `src` - Source points, at least 4.
/// * `dst` - Destination points, same length as `src`.
///
/// # Errors
///
/// Fails on mismatched or too few points, or when the points are degenerate.
pub fn find_homography(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<[[f64; 3]; 3], CalibError> {
    if src.len() != dst.len() {
        return Err(CalibError::LengthMismatch(src.len(), dst.len()));
    }
    if src.len() < 4 {
        return Err(CalibError::NotEnoughPoints {
            what: "correspondences for a homography",
            required: 4,
            got: src.len(),
        });
    }

    let (src_n, t1) = normalize_points_2d(src);
    let (dst_n, t2) = normalize_points_2d(dst);

    let n = src_n.len();
    let mut a = faer::Mat::<f64>::zeros(2 * n, 9);
    for (i, (p, q)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y) = (p[0], p[1]);
        let (u, v) = (q[0], q[1]);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a.write(r0, 0, x);
        a.write(r0, 1, y);
        a.write(r0, 2, 1.0);
        a.write(r0, 6, -u * x);
        a.write(r0, 7, -u * y);
        a.write(r0, 8, -u);
        a.write(r1, 3, x);
        a.write(r1, 4, y);
        a.write(r1, 5, 1.0);
        a.write(r1, 6, -v * x);
        a.write(r1, 7, -v * y);
        a.write(r1, 8, -v);
    }

    let h = null_vector(a.as_ref());
    let hn = [[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], h[8]]];

    let t2_inv = mat33_inverse(&t2)
        .ok_or_else(|| CalibError::Degenerate("destination points coincide".to_string()))?;
    let mut homo = mat33_mul(&t2_inv, &mat33_mul(&hn, &t1));

    if det_mat33(&homo).abs() < 1e-12 {
        return Err(CalibError::Degenerate(
            "homography is singular, points may be collinear".to_string(),
        ));
    }

    let scale = homo[2][2];
    if scale.abs() > f64::EPSILON {
        for row in homo.iter_mut() {
            for v in row.iter_mut() {
                *v /= scale;
            }
        }
    }

    Ok(homo)
}

/// Apply a homography to a 2D point.
pub fn apply_homography(h: &[[f64; 3]; 3], p: &[f64; 2]) -> [f64; 2] {
    let x = h[0][0] * p[0] + h[0][1] * p[1] + h[0][2];
    let y = h[1][0] * p[0] + h[1][1] * p[1] + h[1][2];
    let w = h[2][0] * p[0] + h[2][1] * p[1] + h[2][2];
    [x / w, y / w]
}
