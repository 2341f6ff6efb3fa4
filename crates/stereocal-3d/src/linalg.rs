//! Small dense linear algebra on row-major `[[f64; 3]; 3]` arrays.
//!
//! Fixed size helpers are written out by hand. Factorizations go through faer.

/// The 3x3 identity matrix.
pub const IDENTITY_MAT33: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Multiply two 3x3 matrices.
pub fn mat33_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    out
}

/// Transpose a 3x3 matrix.
pub fn mat33_transpose(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

/// Multiply a 3x3 matrix with a 3 vector.
pub fn mat33_mul_vec3(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Scale every entry of a 3x3 matrix.
pub fn mat33_scale(m: &[[f64; 3]; 3], s: f64) -> [[f64; 3]; 3] {
    m.map(|row| row.map(|v| v * s))
}

/// Compute the determinant of a 3x3 matrix.
pub fn det_mat33(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Invert a 3x3 matrix with the adjugate formula.
///
/// Returns `None` when the determinant is numerically zero.
pub fn mat33_inverse(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = det_mat33(m);
    let scale = m
        .iter()
        .flatten()
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
        .powi(3);
    if det.abs() <= f64::EPSILON * scale.max(f64::MIN_POSITIVE) {
        return None;
    }

    let inv_det = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

/// Cross product of two 3 vectors.
pub fn cross_vec3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Dot product of two 3 vectors.
pub fn dot_product3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Euclidean norm of a 3 vector.
pub fn norm3(v: &[f64; 3]) -> f64 {
    dot_product3(v, v).sqrt()
}

/// The skew symmetric matrix `[v]x` such that `[v]x * w = v x w`.
pub fn skew_symmetric(v: &[f64; 3]) -> [[f64; 3]; 3] {
    [[0.0, -v[2], v[1]], [v[2], 0.0, -v[0]], [-v[1], v[0], 0.0]]
}

/// Apply a rigid transform to a set of points, `dst = R * src + t`.
pub fn transform_points(
    src_points: &[[f64; 3]],
    dst_r_src: &[[f64; 3]; 3],
    dst_t_src: &[f64; 3],
) -> Vec<[f64; 3]> {
    src_points
        .iter()
        .map(|p| {
            let q = mat33_mul_vec3(dst_r_src, p);
            [q[0] + dst_t_src[0], q[1] + dst_t_src[1], q[2] + dst_t_src[2]]
        })
        .collect()
}

/// Copy a 3x3 array into a faer matrix.
pub fn to_faer_mat33(m: &[[f64; 3]; 3]) -> faer::Mat<f64> {
    faer::Mat::from_fn(3, 3, |i, j| m[i][j])
}

/// Copy the top left 3x3 block of a faer matrix into an array.
pub fn from_faer_mat33(m: faer::MatRef<'_, f64>) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = m.read(i, j);
        }
    }
    out
}

/// Singular value decomposition of a 3x3 matrix, `m = U * diag(s) * V^T`.
///
/// Singular values are sorted in decreasing order.
pub fn svd_mat33(m: &[[f64; 3]; 3]) -> ([[f64; 3]; 3], [f64; 3], [[f64; 3]; 3]) {
    let svd = to_faer_mat33(m).svd();
    let s = svd.s_diagonal();
    (
        from_faer_mat33(svd.u()),
        [s.read(0), s.read(1), s.read(2)],
        from_faer_mat33(svd.v()),
    )
}

/// Closest rotation matrix to `m` in the Frobenius norm.
pub fn nearest_rotation(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let (u, _, v) = svd_mat33(m);
    let vt = mat33_transpose(&v);
    let r = mat33_mul(&u, &vt);
    if det_mat33(&r) >= 0.0 {
        return r;
    }
    let mut u_flip = u;
    for row in u_flip.iter_mut() {
        row[2] = -row[2];
    }
    mat33_mul(&u_flip, &vt)
}

/// Unit vector `x` minimizing `|A x|`, i.e. the last right singular vector of `A`.
///
/// `a` must have at least as many rows as columns minus one.
pub fn null_vector(a: faer::MatRef<'_, f64>) -> Vec<f64> {
    let svd = a.svd();
    let v = svd.v();
    let last = v.ncols() - 1;
    (0..v.nrows()).map(|i| v.read(i, last)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inverse() -> Result<(), Box<dyn std::error::Error>> {
        let m = [[4.0, 7.0, 2.0], [3.0, 6.0, 1.0], [2.0, 5.0, 3.0]];
        let inv = mat33_inverse(&m).ok_or("singular")?;
        let id = mat33_mul(&m, &inv);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(id[i][j], IDENTITY_MAT33[i][j], epsilon = 1e-12);
            }
        }
        assert!(mat33_inverse(&[[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 1.0, 1.0]]).is_none());
        Ok(())
    }

    #[test]
    fn test_cross_and_skew() {
        let a = [1.0, 2.0, 3.0];
        let b = [-2.0, 0.5, 4.0];
        let c = cross_vec3(&a, &b);
        assert_eq!(mat33_mul_vec3(&skew_symmetric(&a), &b), c);
        assert_relative_eq!(dot_product3(&c, &a), 0.0);
        assert_relative_eq!(dot_product3(&c, &b), 0.0);
    }

    #[test]
    fn test_svd_reconstruct() {
        let m = [[2.0, -1.0, 0.5], [0.3, 3.0, 1.0], [-1.0, 0.2, 1.5]];
        let (u, s, v) = svd_mat33(&m);
        assert!(s[0] >= s[1] && s[1] >= s[2]);
        let us = [
            [u[0][0] * s[0], u[0][1] * s[1], u[0][2] * s[2]],
            [u[1][0] * s[0], u[1][1] * s[1], u[1][2] * s[2]],
            [u[2][0] * s[0], u[2][1] * s[1], u[2][2] * s[2]],
        ];
        let back = mat33_mul(&us, &mat33_transpose(&v));
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(back[i][j], m[i][j], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_nearest_rotation() {
        let noisy = [[1.01, 0.02, 0.0], [-0.01, 0.99, 0.01], [0.0, -0.02, 1.0]];
        let r = nearest_rotation(&noisy);
        let rrt = mat33_mul(&r, &mat33_transpose(&r));
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(rrt[i][j], IDENTITY_MAT33[i][j], epsilon = 1e-10);
            }
        }
        assert_relative_eq!(det_mat33(&r), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_null_vector() {
        // rows orthogonal to (1, 1, 1) / sqrt(3)
        let a = faer::mat![[1.0, -1.0, 0.0], [0.0, 1.0, -1.0], [1.0, 0.0, -1.0]];
        let x = null_vector(a.as_ref());
        let s = x[0].signum();
        for v in x {
            assert_relative_eq!(v * s, 1.0 / 3f64.sqrt(), epsilon = 1e-10);
        }
    }
}
