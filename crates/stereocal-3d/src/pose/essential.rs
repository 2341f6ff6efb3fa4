use super::normalize_fundamental;
use crate::linalg::{mat33_inverse, mat33_mul, mat33_transpose, skew_symmetric};
use crate::CalibError;

/// Build the essential matrix `E = [t]x * R` of a relative pose.
///
/// `(R, t)` maps points from the first camera frame into the second one.
pub fn essential_from_pose(r: &[[f64; 3]; 3], t: &[f64; 3]) -> [[f64; 3]; 3] {
    mat33_mul(&skew_symmetric(t), r)
}

/// Build the fundamental matrix `F = K2^-T * E * K1^-1` from an essential matrix.
///
/// The result is scaled so that `F[2][2] = 1` when that entry is not zero.
///
/// # Errors
///
/// Fails if one of the camera matrices is singular.
pub fn fundamental_from_essential(
    e: &[[f64; 3]; 3],
    k1: &[[f64; 3]; 3],
    k2: &[[f64; 3]; 3],
) -> Result<[[f64; 3]; 3], CalibError> {
    let k1_inv = mat33_inverse(k1)
        .ok_or_else(|| CalibError::SolveFailed("first camera matrix is singular".to_string()))?;
    let k2_inv = mat33_inverse(k2)
        .ok_or_else(|| CalibError::SolveFailed("second camera matrix is singular".to_string()))?;

    let f = mat33_mul(&mat33_transpose(&k2_inv), &mat33_mul(e, &k1_inv));
    Ok(normalize_fundamental(f))
}

/// Build an essential matrix from a fundamental matrix, `E = K2^T * F * K1`.
pub fn essential_from_fundamental(
    f: &[[f64; 3]; 3],
    k1: &[[f64; 3]; 3],
    k2: &[[f64; 3]; 3],
) -> [[f64; 3]; 3] {
    mat33_mul(&mat33_transpose(k2), &mat33_mul(f, k1))
}
