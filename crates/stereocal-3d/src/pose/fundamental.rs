use super::normalize_points_2d;
use crate::linalg::{mat33_mul, mat33_transpose, null_vector, svd_mat33};
use crate::CalibError;

/// Estimate the fundamental matrix using the normalized 8-point algorithm.
///
/// The result satisfies `x2^T * F * x1 = 0`, has rank 2 and is scaled so that
/// `F[2][2] = 1` whenever that entry is not zero.
///
/// # Arguments
///
/// * `x1` - Points in the first image, at least 8.
/// * `x2` - Corresponding points in the second image.
///
/// # Errors
///
/// Fails on mismatched lengths or fewer than 8 correspondences.
pub fn fundamental_8point(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<[[f64; 3]; 3], CalibError> {
    if x1.len() != x2.len() {
        return Err(CalibError::LengthMismatch(x1.len(), x2.len()));
    }
    if x1.len() < 8 {
        return Err(CalibError::NotEnoughPoints {
            what: "correspondences for the 8-point algorithm",
            required: 8,
            got: x1.len(),
        });
    }

    let (x1n, t1) = normalize_points_2d(x1);
    let (x2n, t2) = normalize_points_2d(x2);

    // design matrix for x2^T F x1 = 0
    let n = x1n.len();
    let mut a = faer::Mat::<f64>::zeros(n, 9);
    for i in 0..n {
        let (x, y) = (x1n[i][0], x1n[i][1]);
        let (xp, yp) = (x2n[i][0], x2n[i][1]);
        a.write(i, 0, xp * x);
        a.write(i, 1, xp * y);
        a.write(i, 2, xp);
        a.write(i, 3, yp * x);
        a.write(i, 4, yp * y);
        a.write(i, 5, yp);
        a.write(i, 6, x);
        a.write(i, 7, y);
        a.write(i, 8, 1.0);
    }

    let fvec = null_vector(a.as_ref());
    let f = [
        [fvec[0], fvec[1], fvec[2]],
        [fvec[3], fvec[4], fvec[5]],
        [fvec[6], fvec[7], fvec[8]],
    ];

    // rank 2: drop the smallest singular value
    let (u, s, v) = svd_mat33(&f);
    let us = [
        [u[0][0] * s[0], u[0][1] * s[1], 0.0],
        [u[1][0] * s[0], u[1][1] * s[1], 0.0],
        [u[2][0] * s[0], u[2][1] * s[1], 0.0],
    ];
    let f_rank2 = mat33_mul(&us, &mat33_transpose(&v));

    // F = T2^T * F * T1
    let f_denorm = mat33_mul(&mat33_transpose(&t2), &mat33_mul(&f_rank2, &t1));
    Ok(normalize_fundamental(f_denorm))
}

/// Scale a fundamental matrix so that `F[2][2] = 1`, unless that entry is
/// negligible next to the others.
pub fn normalize_fundamental(mut f: [[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let scale = f[2][2];
    let norm = f.iter().flatten().map(|v| v * v).sum::<f64>().sqrt();
    if scale.abs() > 1e-9 * norm {
        for row in f.iter_mut() {
            for v in row.iter_mut() {
                *v /= scale;
            }
        }
    }
    f
}

/// Epipolar lines `l = F * x` for points of the first image, drawn in the second.
///
/// Lines are returned as `[a, b, c]` with `a^2 + b^2 = 1`, so that `a*u + b*v + c` is
/// the signed distance of a pixel `(u, v)` to the line. Pass `F^T` to get the lines
/// of second image points in the first image.
pub fn compute_epilines(points: &[[f64; 2]], f: &[[f64; 3]; 3]) -> Vec<[f64; 3]> {
    points
        .iter()
        .map(|p| {
            let a = f[0][0] * p[0] + f[0][1] * p[1] + f[0][2];
            let b = f[1][0] * p[0] + f[1][1] * p[1] + f[1][2];
            let c = f[2][0] * p[0] + f[2][1] * p[1] + f[2][2];
            let norm = (a * a + b * b).sqrt();
            if norm > f64::EPSILON {
                [a / norm, b / norm, c / norm]
            } else {
                [a, b, c]
            }
        })
        .collect()
}

/// Symmetric epipolar distance of a correspondence, in pixels.
///
/// The distance of `x2` to the line of `x1` plus the distance of `x1` to the line of `x2`.
pub fn symmetric_epipolar_distance(f: &[[f64; 3]; 3], x1: &[f64; 2], x2: &[f64; 2]) -> f64 {
    let l2 = compute_epilines(&[*x1], f)[0];
    let l1 = compute_epilines(&[*x2], &mat33_transpose(f))[0];
    (l2[0] * x2[0] + l2[1] * x2[1] + l2[2]).abs() + (l1[0] * x1[0] + l1[1] * x1[1] + l1[2]).abs()
}
