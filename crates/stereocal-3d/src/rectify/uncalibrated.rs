use stereocal_image::ImageSize;

use super::{RectificationModel, RectificationStrategy};
use crate::calib::StereoDataset;
use crate::camera::CameraModel;
use crate::linalg::{
    mat33_inverse, mat33_mul, mat33_mul_vec3, mat33_transpose, skew_symmetric, svd_mat33,
};
use crate::pose::{apply_homography, compute_epilines, fundamental_8point};
use crate::CalibError;

/// Default distance, in pixels, beyond which a correspondence is an outlier.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.0;

/// Rectification from point correspondences alone.
///
/// A fundamental matrix is estimated from the pooled correspondences and two planar
/// homographies are derived from it (Hartley's method). The homographies are turned
/// into rotations through the given camera matrices, `R = K^-1 * H * K`, and each
/// camera keeps its matrix as the rectified projection.
#[derive(Clone, Debug, PartialEq)]
pub struct UncalibratedRectifier {
    /// Corresponding pixel coordinates in the first and second image.
    pub points: [Vec<[f64; 2]>; 2],
    /// Outlier distance to the epipolar lines, in pixels. Non-positive keeps all points.
    pub threshold: f64,
}

impl UncalibratedRectifier {
    /// Create a rectifier from corresponding points.
    pub fn new(first: Vec<[f64; 2]>, second: Vec<[f64; 2]>) -> Self {
        Self {
            points: [first, second],
            threshold: DEFAULT_OUTLIER_THRESHOLD,
        }
    }

    /// Create a rectifier from every view of a dataset.
    pub fn from_dataset(dataset: &StereoDataset) -> Self {
        let [first, second] = dataset.pooled_points();
        Self::new(first, second)
    }

    /// Set the outlier threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

fn line_distance(l: &[f64; 3], p: &[f64; 2]) -> f64 {
    (l[0] * p[0] + l[1] * p[1] + l[2]).abs()
}

fn normalize_homography(h: [[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let s = h[2][2];
    if s.abs() > f64::EPSILON {
        h.map(|row| row.map(|v| v / s))
    } else {
        h
    }
}

/// Planar homographies rectifying a pair of images.
///
/// # Arguments
///
/// * `first` - Points of the first image.
/// * `second` - Corresponding points of the second image.
/// * `fundamental` - Fundamental matrix with `x2^T * F * x1 = 0`.
/// * `image_size` - Size of both images.
/// * `threshold` - Points further than this from the epipolar line of their partner
///   are left out. Non-positive keeps all points.
///
/// # Returns
///
/// The homographies `(H1, H2)`, scaled so that `H[2][2] = 1`.
///
/// # Errors
///
/// Fails if the point sets differ in length or every point is an outlier.
pub fn rectifying_homographies(
    first: &[[f64; 2]],
    second: &[[f64; 2]],
    fundamental: &[[f64; 3]; 3],
    image_size: ImageSize,
    threshold: f64,
) -> Result<([[f64; 3]; 3], [[f64; 3]; 3]), CalibError> {
    if first.len() != second.len() {
        return Err(CalibError::LengthMismatch(first.len(), second.len()));
    }

    let (m1, m2): (Vec<[f64; 2]>, Vec<[f64; 2]>) = if threshold > 0.0 {
        let lines2 = compute_epilines(first, fundamental);
        let lines1 = compute_epilines(second, &mat33_transpose(fundamental));
        first
            .iter()
            .zip(second.iter())
            .enumerate()
            .filter(|(i, (p1, p2))| {
                line_distance(&lines1[*i], p1) <= threshold
                    && line_distance(&lines2[*i], p2) <= threshold
            })
            .map(|(_, (p1, p2))| (*p1, *p2))
            .unzip()
    } else {
        (first.to_vec(), second.to_vec())
    };
    if m1.is_empty() {
        return Err(CalibError::Degenerate(
            "no correspondence lies within the epipolar threshold".to_string(),
        ));
    }
    log::debug!("{} of {} correspondences kept", m1.len(), first.len());

    let norm = fundamental.iter().flatten().map(|v| v * v).sum::<f64>().sqrt();
    if norm <= f64::EPSILON {
        return Err(CalibError::Degenerate("fundamental matrix is zero".to_string()));
    }
    let fundamental = &fundamental.map(|row| row.map(|v| v / norm));

    // epipole of the second image: F^T * e2 = 0
    let (u, _, _) = svd_mat33(fundamental);
    let e2_raw = [u[0][2], u[1][2], u[2][2]];

    let cx = ((image_size.width as f64 - 1.0) * 0.5).round();
    let cy = ((image_size.height as f64 - 1.0) * 0.5).round();
    let centre = [[1.0, 0.0, -cx], [0.0, 1.0, -cy], [0.0, 0.0, 1.0]];
    let uncentre = [[1.0, 0.0, cx], [0.0, 1.0, cy], [0.0, 0.0, 1.0]];

    // rotate the epipole onto the x axis, then send it to infinity
    let e2 = mat33_mul_vec3(&centre, &e2_raw);
    let mirror = e2[0] < 0.0;
    let d = (e2[0] * e2[0] + e2[1] * e2[1]).sqrt().max(f64::EPSILON);
    let (a, b) = (e2[0] / d, e2[1] / d);
    let rot = [[a, b, 0.0], [-b, a, 0.0], [0.0, 0.0, 1.0]];
    let e2 = mat33_mul_vec3(&rot, &e2);
    let invf = if e2[2].abs() < 1e-6 * e2[0].abs() {
        0.0
    } else {
        -e2[2] / e2[0]
    };
    let persp = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [invf, 0.0, 1.0]];
    let h2 = mat33_mul(&uncentre, &mat33_mul(&persp, &mat33_mul(&rot, &centre)));

    // matching transform of the first image: H2 * M with F = [e2]x * M
    let ex_f = mat33_mul(&skew_symmetric(&e2_raw), fundamental);
    let m = std::array::from_fn(|i| std::array::from_fn(|j| ex_f[i][j] + e2_raw[i]));
    let h0 = mat33_mul(&h2, &m);

    // affine correction along x minimizing the disparity of the kept points
    let mut ata = [[0.0; 3]; 3];
    let mut atb = [0.0; 3];
    for (p1, p2) in m1.iter().zip(m2.iter()) {
        let q1 = apply_homography(&h0, p1);
        let q2 = apply_homography(&h2, p2);
        let row = [q1[0], q1[1], 1.0];
        for i in 0..3 {
            for j in 0..3 {
                ata[i][j] += row[i] * row[j];
            }
            atb[i] += row[i] * q2[0];
        }
    }
    let x = match mat33_inverse(&ata) {
        Some(inv) => mat33_mul_vec3(&inv, &atb),
        None => {
            return Err(CalibError::Degenerate(
                "correspondences do not constrain the affine correction".to_string(),
            ))
        }
    };
    let ha = [x, [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    let mut h1 = mat33_mul(&ha, &h0);
    let mut h2 = h2;

    if mirror {
        let flip = [[-1.0, 0.0, 2.0 * cx], [0.0, -1.0, 2.0 * cy], [0.0, 0.0, 1.0]];
        h1 = mat33_mul(&flip, &h1);
        h2 = mat33_mul(&flip, &h2);
    }

    Ok((normalize_homography(h1), normalize_homography(h2)))
}

impl RectificationStrategy for UncalibratedRectifier {
    fn rectify(
        &self,
        cameras: &[CameraModel; 2],
        image_size: ImageSize,
    ) -> Result<RectificationModel, CalibError> {
        let [first, second] = &self.points;
        let fundamental = fundamental_8point(first, second)?;
        let homographies = rectifying_homographies(
            first,
            second,
            &fundamental,
            image_size,
            self.threshold,
        )?;

        let mut rectification = [[[0.0; 3]; 3]; 2];
        let mut projection = [[[0.0; 4]; 3]; 2];
        for (k, h) in [homographies.0, homographies.1].iter().enumerate() {
            let km = &cameras[k].camera_matrix;
            let k_inv = mat33_inverse(km).ok_or_else(|| {
                CalibError::SolveFailed(format!("camera matrix {k} is singular"))
            })?;
            rectification[k] = mat33_mul(&k_inv, &mat33_mul(h, km));
            for i in 0..3 {
                projection[k][i][..3].copy_from_slice(&km[i]);
            }
        }

        log::debug!("uncalibrated rectification from {} points", first.len());

        Ok(RectificationModel {
            rectification,
            projection,
            disparity_to_depth: None,
            valid_roi: None,
            image_size,
        })
    }

    fn is_calibrated(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::rotation_vector_to_matrix;
    use approx::assert_relative_eq;
    use stereocal_imgproc::calibration::distortion::undistort_points;

    fn scene() -> Vec<[f64; 3]> {
        (0..60)
            .map(|i| {
                let s = i as f64;
                [
                    (s * 0.37).sin() * 0.6,
                    (s * 0.53).cos() * 0.4,
                    1.5 + (s * 0.71).sin() * 0.5,
                ]
            })
            .collect()
    }

    fn correspondences(
        camera: &CameraModel,
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
        scene()
            .iter()
            .map(|x| {
                let y = mat33_mul_vec3(rotation, x);
                let y = [
                    y[0] + translation[0],
                    y[1] + translation[1],
                    y[2] + translation[2],
                ];
                (camera.project(x), camera.project(&y))
            })
            .unzip()
    }

    #[test]
    fn test_rectified_rows_agree() -> Result<(), CalibError> {
        let size: ImageSize = [640, 480].into();
        let camera = CameraModel::nominal(size);
        let rotation = rotation_vector_to_matrix(&[0.02, -0.04, 0.01]);
        let (first, second) = correspondences(&camera, &rotation, &[-0.1, 0.01, 0.005]);

        let rectifier = UncalibratedRectifier::new(first.clone(), second.clone());
        assert!(!rectifier.is_calibrated());
        let model = rectifier.rectify(&[camera, camera], size)?;
        assert!(model.disparity_to_depth.is_none());
        assert!(model.valid_roi.is_none());
        assert!(!model.is_vertical_stereo());
        assert_eq!(model.camera_matrix(0), camera.camera_matrix);

        for (p1, p2) in first.iter().zip(second.iter()) {
            let q1 = undistort_points(
                &[*p1],
                &camera.intrinsic(),
                &camera.distortion,
                Some(&model.rectification[0]),
                Some(&model.camera_matrix(0)),
            )[0];
            let q2 = undistort_points(
                &[*p2],
                &camera.intrinsic(),
                &camera.distortion,
                Some(&model.rectification[1]),
                Some(&model.camera_matrix(1)),
            )[0];
            assert_relative_eq!(q1[1], q2[1], epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_homographies_of_rectified_pair() -> Result<(), CalibError> {
        let size: ImageSize = [640, 480].into();
        let camera = CameraModel::nominal(size);
        let rotation = rotation_vector_to_matrix(&[0.0, 0.0, 0.0]);
        let (first, second) = correspondences(&camera, &rotation, &[-0.1, 0.0, 0.0]);
        let f = fundamental_8point(&first, &second)?;
        let (h1, h2) = rectifying_homographies(&first, &second, &f, size, 3.0)?;

        for h in [h1, h2] {
            assert_relative_eq!(h[2][2], 1.0);
        }
        // rows are already aligned and stay so
        for (p1, p2) in first.iter().zip(second.iter()) {
            let q1 = apply_homography(&h1, p1);
            let q2 = apply_homography(&h2, p2);
            assert_relative_eq!(q1[1], q2[1], epsilon = 1e-6);
            assert_relative_eq!(q2[1], p2[1], epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_all_outliers() {
        let size: ImageSize = [640, 480].into();
        let first = vec![[10.0, 10.0], [200.0, 50.0]];
        let second = vec![[10.0, 300.0], [200.0, 400.0]];
        // horizontal epipolar lines: y2 must equal y1
        let f = [[0.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]];
        let res = rectifying_homographies(&first, &second, &f, size, 3.0);
        assert!(matches!(res, Err(CalibError::Degenerate(_))));
    }

    #[test]
    fn test_length_mismatch() {
        let rectifier = UncalibratedRectifier::new(vec![[0.0; 2]; 9], vec![[0.0; 2]; 8]);
        let camera = CameraModel::nominal([64, 48].into());
        assert!(rectifier.rectify(&[camera, camera], [64, 48].into()).is_err());
    }
}
