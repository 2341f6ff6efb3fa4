use crate::linalg::{mat33_transpose, IDENTITY_MAT33};

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation, not necessarily unit length.
/// * `angle` - The angle of rotation in radians.
///
/// # Returns
///
/// The rotation matrix, or `None` if the axis is a zero vector.
///
/// Example:
///
/// ```
/// use stereocal_3d::transforms::axis_angle_to_rotation_matrix;
///
/// let rotation = axis_angle_to_rotation_matrix(&[1.0, 0.0, 0.0], std::f64::consts::FRAC_PI_2).unwrap();
/// assert!((rotation[1][2] + 1.0).abs() < 1e-12);
/// ```
pub fn axis_angle_to_rotation_matrix(axis: &[f64; 3], angle: f64) -> Option<[[f64; 3]; 3]> {
    let magnitude = (axis[0].powi(2) + axis[1].powi(2) + axis[2].powi(2)).sqrt();
    if magnitude < 1e-12 {
        return None;
    }
    let [x, y, z] = axis.map(|v| v / magnitude);

    let (s, c) = angle.sin_cos();
    let t = 1.0 - c;

    Some([
        [c + x * x * t, x * y * t - z * s, x * z * t + y * s],
        [x * y * t + z * s, c + y * y * t, y * z * t - x * s],
        [x * z * t - y * s, y * z * t + x * s, c + z * z * t],
    ])
}

/// Convert a rotation vector (axis times angle) into a rotation matrix.
///
/// The zero vector maps to the identity.
pub fn rotation_vector_to_matrix(rvec: &[f64; 3]) -> [[f64; 3]; 3] {
    let theta = (rvec[0].powi(2) + rvec[1].powi(2) + rvec[2].powi(2)).sqrt();
    axis_angle_to_rotation_matrix(rvec, theta).unwrap_or(IDENTITY_MAT33)
}

/// Convert a rotation matrix into a rotation vector with angle in `[0, pi]`.
pub fn rotation_matrix_to_vector(r: &[[f64; 3]; 3]) -> [f64; 3] {
    let axis = [r[2][1] - r[1][2], r[0][2] - r[2][0], r[1][0] - r[0][1]];
    let sin_theta = 0.5 * (axis[0].powi(2) + axis[1].powi(2) + axis[2].powi(2)).sqrt();
    let cos_theta = ((r[0][0] + r[1][1] + r[2][2] - 1.0) * 0.5).clamp(-1.0, 1.0);

    if sin_theta < 1e-5 {
        if cos_theta > 0.0 {
            // small angle: first order expansion
            return axis.map(|v| 0.5 * v);
        }

        // angle close to pi: the axis is the dominant column of (R + I) / 2
        let b = [
            [(r[0][0] + 1.0) * 0.5, (r[0][1] + r[1][0]) * 0.25, (r[0][2] + r[2][0]) * 0.25],
            [(r[0][1] + r[1][0]) * 0.25, (r[1][1] + 1.0) * 0.5, (r[1][2] + r[2][1]) * 0.25],
            [(r[0][2] + r[2][0]) * 0.25, (r[1][2] + r[2][1]) * 0.25, (r[2][2] + 1.0) * 0.5],
        ];
        let k = (0..3)
            .max_by(|&a, &c| b[a][a].total_cmp(&b[c][c]))
            .unwrap_or(0);
        let norm = b[k][k].max(f64::MIN_POSITIVE).sqrt();
        let theta = cos_theta.acos();
        let sign = if axis[k] < 0.0 { -1.0 } else { 1.0 };
        return [b[0][k], b[1][k], b[2][k]].map(|v| sign * v / norm * theta);
    }

    let theta = sin_theta.atan2(cos_theta);
    let scale = theta / (2.0 * sin_theta);
    axis.map(|v| v * scale)
}

/// Invert a rigid transform `(R, t)`, returning `(R^T, -R^T t)`.
pub fn invert_rigid(r: &[[f64; 3]; 3], t: &[f64; 3]) -> ([[f64; 3]; 3], [f64; 3]) {
    let rt = mat33_transpose(r);
    let ti = crate::linalg::mat33_mul_vec3(&rt, t);
    (rt, [-ti[0], -ti[1], -ti[2]])
}
