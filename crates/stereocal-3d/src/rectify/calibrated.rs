use stereocal_image::ImageSize;
use stereocal_imgproc::calibration::distortion::undistort_points;

use super::{projection_block, RectificationModel, RectificationStrategy, RoiRect};
use crate::camera::CameraModel;
use crate::linalg::{cross_vec3, mat33_mul, mat33_mul_vec3, mat33_transpose, norm3};
use crate::transforms::{rotation_matrix_to_vector, rotation_vector_to_matrix};
use crate::CalibError;

/// Samples per side of the grid used to find the valid pixel rectangles.
const ROI_GRID: usize = 9;

/// Rectification of a metrically calibrated rig.
///
/// Each camera is rotated by half of the relative rotation so both look the same way,
/// then both are rotated so the baseline lies along the image x (or y) axis. The two
/// rectified cameras share one focal length; their principal points are chosen so the
/// rectified image covers the raw one, and `alpha` trades between keeping only valid
/// pixels (`0`) and keeping every raw pixel (`1`).
#[derive(Clone, Debug, PartialEq)]
pub struct CalibratedRectifier {
    /// Rotation from the first to the second camera frame.
    pub rotation: [[f64; 3]; 3],
    /// Translation from the first to the second camera frame.
    pub translation: [f64; 3],
    /// Free scaling parameter in `[0, 1]`, or negative to skip the scaling.
    pub alpha: f64,
    /// Give both rectified cameras the same principal point.
    pub zero_disparity: bool,
}

impl CalibratedRectifier {
    /// Create a rectifier from the relative pose of the second camera.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
            alpha: 1.0,
            zero_disparity: true,
        }
    }

    /// Set the free scaling parameter.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Choose whether both principal points are made equal.
    pub fn with_zero_disparity(mut self, zero_disparity: bool) -> Self {
        self.zero_disparity = zero_disparity;
        self
    }

    /// Rotations that make the two image planes coplanar with the baseline along
    /// axis `idx`. Returns `(R1, R2, R2 * T, idx)`.
    fn rectifying_rotations(
        &self,
    ) -> Result<([[f64; 3]; 3], [[f64; 3]; 3], [f64; 3], usize), CalibError> {
        let om = rotation_matrix_to_vector(&self.rotation);
        let r_r = rotation_vector_to_matrix(&[-0.5 * om[0], -0.5 * om[1], -0.5 * om[2]]);
        let t = mat33_mul_vec3(&r_r, &self.translation);

        let nt = norm3(&t);
        if nt <= f64::EPSILON {
            return Err(CalibError::Degenerate("the baseline is zero".to_string()));
        }

        let idx = if t[0].abs() > t[1].abs() { 0 } else { 1 };
        let c = t[idx];
        let mut uu = [0.0; 3];
        uu[idx] = if c > 0.0 { 1.0 } else { -1.0 };

        // rotate t onto the closest image axis
        let mut ww = cross_vec3(&t, &uu);
        let nw = norm3(&ww);
        if nw > 0.0 {
            let scale = (c.abs() / nt).clamp(-1.0, 1.0).acos() / nw;
            ww.iter_mut().for_each(|w| *w *= scale);
        }
        let w_r = rotation_vector_to_matrix(&ww);

        let r1 = mat33_mul(&w_r, &mat33_transpose(&r_r));
        let r2 = mat33_mul(&w_r, &r_r);
        let t = mat33_mul_vec3(&r2, &self.translation);
        Ok((r1, r2, t, idx))
    }
}

#[derive(Clone, Copy, Debug)]
struct FloatRect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Inner and outer rectangles of the raw image once rectified.
///
/// The outer rectangle bounds every mapped sample of the raw image, the inner one is
/// the largest axis aligned rectangle inside the mapped image border.
fn rectified_rectangles(
    camera: &CameraModel,
    rectification: &[[f64; 3]; 3],
    projection: &[[f64; 3]; 3],
    size: ImageSize,
) -> (FloatRect, FloatRect) {
    let n = ROI_GRID;
    let step_x = (size.width as f64 - 1.0) / (n - 1) as f64;
    let step_y = (size.height as f64 - 1.0) / (n - 1) as f64;
    let grid = (0..n)
        .flat_map(|i| (0..n).map(move |j| [j as f64 * step_x, i as f64 * step_y]))
        .collect::<Vec<_>>();

    let pts = undistort_points(
        &grid,
        &camera.intrinsic(),
        &camera.distortion,
        Some(rectification),
        Some(projection),
    );

    let (mut ox0, mut oy0, mut ox1, mut oy1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    let (mut ix0, mut iy0, mut ix1, mut iy1) = (f64::MIN, f64::MIN, f64::MAX, f64::MAX);
    for (k, p) in pts.iter().enumerate() {
        let (i, j) = (k / n, k % n);
        ox0 = ox0.min(p[0]);
        ox1 = ox1.max(p[0]);
        oy0 = oy0.min(p[1]);
        oy1 = oy1.max(p[1]);

        if j == 0 {
            ix0 = ix0.max(p[0]);
        }
        if j == n - 1 {
            ix1 = ix1.min(p[0]);
        }
        if i == 0 {
            iy0 = iy0.max(p[1]);
        }
        if i == n - 1 {
            iy1 = iy1.min(p[1]);
        }
    }

    (
        FloatRect {
            x: ix0,
            y: iy0,
            width: ix1 - ix0,
            height: iy1 - iy0,
        },
        FloatRect {
            x: ox0,
            y: oy0,
            width: ox1 - ox0,
            height: oy1 - oy0,
        },
    )
}

/// Scale the inner rectangle about the principal point and clip it to the image.
fn scaled_roi(inner: &FloatRect, c: [f64; 2], s: f64, size: ImageSize) -> RoiRect {
    let x0 = ((inner.x - c[0]) * s + c[0]).ceil();
    let y0 = ((inner.y - c[1]) * s + c[1]).ceil();
    let x1 = (x0 + (inner.width * s).floor()).min(size.width as f64);
    let y1 = (y0 + (inner.height * s).floor()).min(size.height as f64);
    let (x0, y0) = (x0.max(0.0), y0.max(0.0));

    if !(x0.is_finite() && y0.is_finite() && x1.is_finite() && y1.is_finite())
        || x1 <= x0
        || y1 <= y0
    {
        return RoiRect::default();
    }
    RoiRect {
        x: x0 as usize,
        y: y0 as usize,
        width: (x1 - x0) as usize,
        height: (y1 - y0) as usize,
    }
}

fn projection_matrix(f: f64, c: [f64; 2]) -> [[f64; 4]; 3] {
    [[f, 0.0, c[0], 0.0], [0.0, f, c[1], 0.0], [0.0, 0.0, 1.0, 0.0]]
}

impl RectificationStrategy for CalibratedRectifier {
    fn rectify(
        &self,
        cameras: &[CameraModel; 2],
        image_size: ImageSize,
    ) -> Result<RectificationModel, CalibError> {
        if image_size.width < 2 || image_size.height < 2 {
            return Err(CalibError::InvalidParameter(
                "image_size",
                format!("{image_size} is too small to rectify"),
            ));
        }
        if !self.alpha.is_finite() {
            return Err(CalibError::InvalidParameter(
                "alpha",
                format!("{} is not finite", self.alpha),
            ));
        }

        let (r1, r2, t, idx) = self.rectifying_rotations()?;
        let rotations = [r1, r2];
        let (nx, ny) = (image_size.width as f64, image_size.height as f64);

        // common focal length, shrunk for barrel distortion so the corners stay visible
        let mut fc_new = f64::MAX;
        for camera in cameras {
            let k1 = camera.distortion.k1;
            let mut fc = camera.camera_matrix[idx ^ 1][idx ^ 1];
            if k1 < 0.0 {
                fc *= 1.0 + k1 * (nx * nx + ny * ny) / (4.0 * fc * fc);
            }
            fc_new = fc_new.min(fc);
        }
        if !(fc_new.is_finite() && fc_new > 0.0) {
            return Err(CalibError::Degenerate(format!(
                "rectified focal length {fc_new} is not positive"
            )));
        }

        // principal points centring the rectified image corners
        let corners = [[0.0, 0.0], [nx - 1.0, 0.0], [0.0, ny - 1.0], [nx - 1.0, ny - 1.0]];
        let centred = [[fc_new, 0.0, 0.0], [0.0, fc_new, 0.0], [0.0, 0.0, 1.0]];
        let mut cc = [[0.0; 2]; 2];
        for (k, camera) in cameras.iter().enumerate() {
            let pts = undistort_points(
                &corners,
                &camera.intrinsic(),
                &camera.distortion,
                Some(&rotations[k]),
                Some(&centred),
            );
            let avg_x = pts.iter().map(|p| p[0]).sum::<f64>() / 4.0;
            let avg_y = pts.iter().map(|p| p[1]).sum::<f64>() / 4.0;
            cc[k] = [(nx - 1.0) * 0.5 - avg_x, (ny - 1.0) * 0.5 - avg_y];
        }

        // the coordinate orthogonal to the baseline must agree to keep the epipolar
        // lines aligned
        let shared: &[usize] = if self.zero_disparity {
            &[0, 1]
        } else if idx == 0 {
            &[1]
        } else {
            &[0]
        };
        for &axis in shared {
            let mean = 0.5 * (cc[0][axis] + cc[1][axis]);
            cc[0][axis] = mean;
            cc[1][axis] = mean;
        }

        let mut p1 = projection_matrix(fc_new, cc[0]);
        let mut p2 = projection_matrix(fc_new, cc[1]);
        p2[idx][3] = t[idx] * fc_new;

        let (inner1, outer1) =
            rectified_rectangles(&cameras[0], &r1, &projection_block(&p1), image_size);
        let (inner2, outer2) =
            rectified_rectangles(&cameras[1], &r2, &projection_block(&p2), image_size);

        let alpha = self.alpha.min(1.0);
        let mut s = 1.0;
        if alpha >= 0.0 {
            let (w1, h1) = (nx - 1.0, ny - 1.0);
            let mut s0 = f64::MIN;
            let mut s1 = f64::MAX;
            for (k, (inner, outer)) in [(inner1, outer1), (inner2, outer2)].iter().enumerate() {
                let [cx, cy] = cc[k];
                s0 = s0
                    .max(cx / (cx - inner.x))
                    .max(cy / (cy - inner.y))
                    .max((w1 - cx) / (inner.x + inner.width - cx))
                    .max((h1 - cy) / (inner.y + inner.height - cy));
                s1 = s1
                    .min(cx / (cx - outer.x))
                    .min(cy / (cy - outer.y))
                    .min((w1 - cx) / (outer.x + outer.width - cx))
                    .min((h1 - cy) / (outer.y + outer.height - cy));
            }
            s = s0 * (1.0 - alpha) + s1 * alpha;
            if !(s.is_finite() && s > 0.0) {
                return Err(CalibError::Degenerate(format!(
                    "rectified image scale {s} is not positive"
                )));
            }
        }

        let fc = fc_new * s;
        let baseline_term = p2[idx][3] * s;
        p1 = projection_matrix(fc, cc[0]);
        p2 = projection_matrix(fc, cc[1]);
        p2[idx][3] = baseline_term;

        let roi = [
            scaled_roi(&inner1, cc[0], s, image_size),
            scaled_roi(&inner2, cc[1], s, image_size),
        ];

        let offset = if idx == 0 {
            cc[0][0] - cc[1][0]
        } else {
            cc[0][1] - cc[1][1]
        };
        let q = [
            [1.0, 0.0, 0.0, -cc[0][0]],
            [0.0, 1.0, 0.0, -cc[0][1]],
            [0.0, 0.0, 0.0, fc],
            [0.0, 0.0, -1.0 / t[idx], offset / t[idx]],
        ];

        log::debug!(
            "calibrated rectification: f = {:.3}, scale = {:.4}, {} stereo",
            fc,
            s,
            if idx == 0 { "horizontal" } else { "vertical" }
        );

        Ok(RectificationModel {
            rectification: rotations,
            projection: [p1, p2],
            disparity_to_depth: Some(q),
            valid_roi: Some(roi),
            image_size,
        })
    }

    fn is_calibrated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{det_mat33, IDENTITY_MAT33};
    use crate::rectify::build_remap_tables;
    use approx::assert_relative_eq;
    use stereocal_imgproc::calibration::distortion::PolynomialDistortion;

    fn size() -> ImageSize {
        [640, 480].into()
    }

    fn ideal_camera() -> CameraModel {
        CameraModel::new(
            [[500.0, 0.0, 319.5], [0.0, 500.0, 239.5], [0.0, 0.0, 1.0]],
            PolynomialDistortion::default(),
        )
    }

    fn rectified(
        camera: &CameraModel,
        model: &RectificationModel,
        k: usize,
        p: &[f64; 2],
    ) -> [f64; 2] {
        undistort_points(
            &[*p],
            &camera.intrinsic(),
            &camera.distortion,
            Some(&model.rectification[k]),
            Some(&model.camera_matrix(k)),
        )[0]
    }

    #[test]
    fn test_rectify_already_rectified_pair() -> Result<(), CalibError> {
        let cam = ideal_camera();
        let cams = [cam, cam];
        let model = CalibratedRectifier::new(IDENTITY_MAT33, [-0.1, 0.0, 0.0])
            .rectify(&cams, size())?;

        for k in 0..2 {
            for i in 0..3 {
                for j in 0..3 {
                    assert_relative_eq!(
                        model.rectification[k][i][j],
                        IDENTITY_MAT33[i][j],
                        epsilon = 1e-12
                    );
                    assert_relative_eq!(
                        model.projection[k][i][j],
                        cam.camera_matrix[i][j],
                        epsilon = 1e-6
                    );
                }
            }
        }
        assert_relative_eq!(model.projection[1][0][3], -50.0, epsilon = 1e-6);
        assert!(!model.is_vertical_stereo());

        let q = model.disparity_to_depth.ok_or(CalibError::SolveFailed("no Q".into()))?;
        assert_relative_eq!(q[3][2], 10.0, epsilon = 1e-9);
        assert_relative_eq!(q[2][3], 500.0, epsilon = 1e-6);

        let roi = model.valid_roi.ok_or(CalibError::SolveFailed("no roi".into()))?;
        for r in roi {
            assert!(r.width >= 638 && r.height >= 478, "{r:?}");
        }

        let tables = build_remap_tables(&cams, &model)?;
        for table in tables.iter() {
            for (v, u) in [(0, 0), (100, 37), (479, 639), (240, 320)] {
                let x = *table.map_x.get_pixel(u, v, 0)?;
                let y = *table.map_y.get_pixel(u, v, 0)?;
                assert!((x - u as f32).abs() < 1e-3, "{x} vs {u}");
                assert!((y - v as f32).abs() < 1e-3, "{y} vs {v}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_rectified_points_share_rows() -> Result<(), CalibError> {
        let cam0 = CameraModel::new(
            [[520.0, 0.0, 322.0], [0.0, 518.0, 236.0], [0.0, 0.0, 1.0]],
            PolynomialDistortion::from_coefficients(&[-0.12, 0.03]),
        );
        let cam1 = CameraModel::new(
            [[510.0, 0.0, 316.0], [0.0, 509.0, 244.0], [0.0, 0.0, 1.0]],
            PolynomialDistortion::from_coefficients(&[-0.1, 0.02]),
        );
        let rotation = rotation_vector_to_matrix(&[0.01, -0.03, 0.02]);
        let translation = [-0.12, 0.004, 0.003];
        let model = CalibratedRectifier::new(rotation, translation)
            .with_alpha(0.0)
            .rectify(&[cam0, cam1], size())?;

        for r in model.rectification.iter() {
            assert_relative_eq!(det_mat33(r), 1.0, epsilon = 1e-9);
        }
        let q = model.disparity_to_depth.ok_or(CalibError::SolveFailed("no Q".into()))?;

        for x in [[0.1, 0.05, 1.2], [-0.3, 0.2, 2.0], [0.25, -0.15, 0.9]] {
            let x1 = mat33_mul_vec3(&rotation, &x);
            let x1 = [
                x1[0] + translation[0],
                x1[1] + translation[1],
                x1[2] + translation[2],
            ];
            let a = rectified(&cam0, &model, 0, &cam0.project(&x));
            let b = rectified(&cam1, &model, 1, &cam1.project(&x1));
            assert_relative_eq!(a[1], b[1], epsilon = 1e-6);

            // reprojecting the disparity gives the point in the rectified first frame
            let d = a[0] - b[0];
            let h = [a[0], a[1], d, 1.0];
            let qh: Vec<f64> = q
                .iter()
                .map(|row| row.iter().zip(h.iter()).map(|(m, v)| m * v).sum())
                .collect();
            let expected = mat33_mul_vec3(&model.rectification[0], &x);
            for i in 0..3 {
                assert_relative_eq!(qh[i] / qh[3], expected[i], epsilon = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_vertical_rig() -> Result<(), CalibError> {
        let cam = ideal_camera();
        let model = CalibratedRectifier::new(IDENTITY_MAT33, [0.002, -0.1, 0.0])
            .rectify(&[cam, cam], size())?;
        assert!(model.is_vertical_stereo());

        let x = [0.1, 0.2, 1.5];
        let a = rectified(&cam, &model, 0, &cam.project(&x));
        let b = rectified(&cam, &model, 1, &cam.project(&[x[0] + 0.002, x[1] - 0.1, x[2]]));
        assert_relative_eq!(a[0], b[0], epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_zero_baseline() {
        let cam = ideal_camera();
        let res = CalibratedRectifier::new(IDENTITY_MAT33, [0.0; 3]).rectify(&[cam, cam], size());
        assert!(matches!(res, Err(CalibError::Degenerate(_))));
    }

    #[test]
    fn test_alpha_changes_focal_length() -> Result<(), CalibError> {
        let cam = CameraModel::new(
            [[500.0, 0.0, 319.5], [0.0, 500.0, 239.5], [0.0, 0.0, 1.0]],
            PolynomialDistortion::from_coefficients(&[-0.3, 0.08]),
        );
        let rig = CalibratedRectifier::new(IDENTITY_MAT33, [-0.1, 0.0, 0.0]);
        let tight = rig.clone().with_alpha(0.0).rectify(&[cam, cam], size())?;
        let full = rig.with_alpha(1.0).rectify(&[cam, cam], size())?;
        // keeping every raw pixel needs a wider field of view
        assert!(full.projection[0][0][0] < tight.projection[0][0][0]);
        Ok(())
    }
}
