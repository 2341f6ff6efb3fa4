use crate::camera::CameraModel;
use crate::linalg::mat33_mul_vec3;

/// Project board points through a rigid transform and a camera.
///
/// # Arguments
///
/// * `object_points` - Points in the board frame.
/// * `rotation` - Rotation from the board to the camera frame.
/// * `translation` - Translation from the board to the camera frame.
/// * `camera` - The camera model, distortion included.
pub fn project_points(
    object_points: &[[f64; 3]],
    rotation: &[[f64; 3]; 3],
    translation: &[f64; 3],
    camera: &CameraModel,
) -> Vec<[f64; 2]> {
    object_points
        .iter()
        .map(|p| {
            let q = mat33_mul_vec3(rotation, p);
            camera.project(&[
                q[0] + translation[0],
                q[1] + translation[1],
                q[2] + translation[2],
            ])
        })
        .collect()
}

/// Root mean square of the per-point reprojection distance.
pub fn rms_error(sum_squared: f64, num_points: usize) -> f64 {
    if num_points == 0 {
        return 0.0;
    }
    (sum_squared / num_points as f64).sqrt()
}
