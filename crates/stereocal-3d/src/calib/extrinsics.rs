use crate::camera::CameraModel;
use crate::linalg::{cross_vec3, mat33_mul, mat33_mul_vec3, nearest_rotation, norm3};
use crate::pose::find_homography;
use crate::transforms::{rotation_matrix_to_vector, rotation_vector_to_matrix};
use crate::CalibError;

/// Pose of the calibration board in a camera frame, `X_cam = R * X_board + t`.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoardPose {
    /// Rotation vector (axis times angle).
    pub rvec: [f64; 3],
    /// Translation.
    pub tvec: [f64; 3],
}

impl BoardPose {
    /// Build a pose from a rotation matrix and translation.
    pub fn from_rotation(rotation: &[[f64; 3]; 3], tvec: [f64; 3]) -> Self {
        Self {
            rvec: rotation_matrix_to_vector(rotation),
            tvec,
        }
    }

    /// The rotation matrix of the pose.
    pub fn rotation_matrix(&self) -> [[f64; 3]; 3] {
        rotation_vector_to_matrix(&self.rvec)
    }

    /// Chain this pose with a rigid transform applied after it.
    ///
    /// Returns the rotation and translation of `X -> r * (R * X + t) + tr`.
    pub fn then(&self, r: &[[f64; 3]; 3], tr: &[f64; 3]) -> ([[f64; 3]; 3], [f64; 3]) {
        let rotation = mat33_mul(r, &self.rotation_matrix());
        let rt = mat33_mul_vec3(r, &self.tvec);
        (rotation, [rt[0] + tr[0], rt[1] + tr[1], rt[2] + tr[2]])
    }
}

/// Initial board pose from the homography between the board plane and the image.
///
/// The observed points are first undistorted with the camera model so that the
/// homography is estimated in normalized image coordinates. The board is assumed
/// to lie in front of the camera.
///
/// # Errors
///
/// Fails if the board is not planar (`z != 0`) or the homography is degenerate.
pub fn init_board_pose(
    object_points: &[[f64; 3]],
    image_points: &[[f64; 2]],
    camera: &CameraModel,
) -> Result<BoardPose, CalibError> {
    if object_points.iter().any(|p| p[2].abs() > 1e-9) {
        return Err(CalibError::Degenerate(
            "board points must lie on the plane z = 0".to_string(),
        ));
    }

    let obj_xy = object_points.iter().map(|p| [p[0], p[1]]).collect::<Vec<_>>();
    let normalized = camera.undistort_normalized(image_points);
    let h = find_homography(&obj_xy, &normalized)?;

    let col = |j: usize| [h[0][j], h[1][j], h[2][j]];
    let (h1, h2, h3) = (col(0), col(1), col(2));

    let norm = 0.5 * (norm3(&h1) + norm3(&h2));
    if norm < f64::EPSILON {
        return Err(CalibError::Degenerate(
            "board homography has no rotation part".to_string(),
        ));
    }

    // the board must end up in front of the camera
    let lambda = if h3[2] < 0.0 { -1.0 / norm } else { 1.0 / norm };
    let r1 = h1.map(|v| v * lambda);
    let r2 = h2.map(|v| v * lambda);
    let r3 = cross_vec3(&r1, &r2);
    let tvec = h3.map(|v| v * lambda);

    let approx = [
        [r1[0], r2[0], r3[0]],
        [r1[1], r2[1], r3[1]],
        [r1[2], r2[2], r3[2]],
    ];
    Ok(BoardPose::from_rotation(&nearest_rotation(&approx), tvec))
}

/// Per-component median of a set of relative poses.
pub(crate) fn median_pose(poses: &[BoardPose]) -> BoardPose {
    let median = |values: &mut Vec<f64>| -> f64 {
        values.sort_by(f64::total_cmp);
        let n = values.len();
        match n {
            0 => 0.0,
            _ if n % 2 == 1 => values[n / 2],
            _ => 0.5 * (values[n / 2 - 1] + values[n / 2]),
        }
    };

    let mut out = BoardPose::default();
    for k in 0..3 {
        out.rvec[k] = median(&mut poses.iter().map(|p| p.rvec[k]).collect());
        out.tvec[k] = median(&mut poses.iter().map(|p| p.tvec[k]).collect());
    }
    out
}
