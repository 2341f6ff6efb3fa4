use stereocal_image::ImageSize;
use stereocal_imgproc::calibration::{
    distortion::{distort_normalized, undistort_points, PolynomialDistortion},
    CameraIntrinsic,
};

/// A pinhole camera with a polynomial lens distortion.
///
/// The camera matrix is `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CameraModel {
    /// The 3x3 camera matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// The lens distortion coefficients.
    pub distortion: PolynomialDistortion,
}

impl CameraModel {
    /// Create a camera from a camera matrix and distortion.
    pub fn new(camera_matrix: [[f64; 3]; 3], distortion: PolynomialDistortion) -> Self {
        Self {
            camera_matrix,
            distortion,
        }
    }

    /// Create an undistorted camera from its intrinsics.
    pub fn from_intrinsic(intrinsic: &CameraIntrinsic) -> Self {
        Self::new(intrinsic.to_matrix(), PolynomialDistortion::default())
    }

    /// A nominal camera for an image size when nothing is known about the lens.
    ///
    /// The focal length is the largest image side, the principal point is the image
    /// centre and there is no distortion.
    pub fn nominal(size: ImageSize) -> Self {
        let f = size.width.max(size.height) as f64;
        Self::from_intrinsic(&CameraIntrinsic {
            fx: f,
            fy: f,
            cx: (size.width as f64 - 1.0) * 0.5,
            cy: (size.height as f64 - 1.0) * 0.5,
        })
    }

    /// The intrinsic parameters.
    pub fn intrinsic(&self) -> CameraIntrinsic {
        CameraIntrinsic::from_matrix(&self.camera_matrix)
    }

    /// Project a point given in the camera frame to pixel coordinates.
    pub fn project(&self, p: &[f64; 3]) -> [f64; 2] {
        let z_inv = if p[2].abs() > f64::EPSILON {
            1.0 / p[2]
        } else {
            1.0
        };
        let (xd, yd) = distort_normalized(p[0] * z_inv, p[1] * z_inv, &self.distortion);
        let k = &self.camera_matrix;
        [
            k[0][0] * xd + k[0][1] * yd + k[0][2],
            k[1][1] * yd + k[1][2],
        ]
    }

    /// Remove the lens distortion from pixel coordinates.
    ///
    /// The result is expressed in normalized image coordinates.
    pub fn undistort_normalized(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        undistort_points(points, &self.intrinsic(), &self.distortion, None, None)
    }

    /// Remove the lens distortion and re-project through the camera's own matrix.
    pub fn undistort_pixels(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        undistort_points(
            points,
            &self.intrinsic(),
            &self.distortion,
            None,
            Some(&self.camera_matrix),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nominal_camera() {
        let cam = CameraModel::nominal([640, 480].into());
        assert_eq!(cam.camera_matrix[0][0], 640.0);
        assert_eq!(cam.camera_matrix[1][1], 640.0);
        assert_eq!(cam.camera_matrix[0][2], 319.5);
        assert_eq!(cam.camera_matrix[1][2], 239.5);
        assert_eq!(cam.distortion, PolynomialDistortion::default());
    }

    #[test]
    fn test_project_undistort() {
        let cam = CameraModel::new(
            [[500.0, 0.0, 320.0], [0.0, 505.0, 240.0], [0.0, 0.0, 1.0]],
            PolynomialDistortion::from_coefficients(&[-0.2, 0.05, 0.001, -0.001]),
        );
        let p = [0.2, -0.1, 1.5];
        let px = cam.project(&p);
        let back = cam.undistort_normalized(&[px]);
        assert_relative_eq!(back[0][0], p[0] / p[2], epsilon = 1e-6);
        assert_relative_eq!(back[0][1], p[1] / p[2], epsilon = 1e-6);
    }
}
