use stereocal_image::ImageSize;

use crate::pose::find_homography;
use crate::CalibError;

/// Closed form initial camera matrix from several views of a planar target.
///
/// The principal point is fixed at the image centre. Each view contributes the two
/// orthogonality constraints of its plane homography on `1 / fx^2` and `1 / fy^2`,
/// which are then solved in a least squares sense.
///
/// # Arguments
///
/// * `object_points` - Board points per view, all on the plane `z = 0`.
/// * `image_points` - Observed projections per view.
/// * `image_size` - Size of the calibration images.
/// * `aspect_ratio` - If set, the returned matrix has `fx = aspect_ratio * fy`.
///
/// # Errors
///
/// Fails when the views do not constrain the focal length, e.g. fronto-parallel
/// boards only.
pub fn init_camera_matrix(
    object_points: &[Vec<[f64; 3]>],
    image_points: &[Vec<[f64; 2]>],
    image_size: ImageSize,
    aspect_ratio: Option<f64>,
) -> Result<[[f64; 3]; 3], CalibError> {
    if object_points.len() != image_points.len() {
        return Err(CalibError::LengthMismatch(
            object_points.len(),
            image_points.len(),
        ));
    }
    if object_points.is_empty() {
        return Err(CalibError::NotEnoughPoints {
            what: "views",
            required: 1,
            got: 0,
        });
    }

    let cx = (image_size.width as f64 - 1.0) * 0.5;
    let cy = (image_size.height as f64 - 1.0) * 0.5;

    // normal equations of the 2 x 2 least squares system on (1/fx^2, 1/fy^2)
    let (mut ata, mut atb) = ([[0.0f64; 2]; 2], [0.0f64; 2]);
    let mut add_row = |a: [f64; 2], b: f64| {
        for i in 0..2 {
            atb[i] += a[i] * b;
            for j in 0..2 {
                ata[i][j] += a[i] * a[j];
            }
        }
    };

    for (obj, img) in object_points.iter().zip(image_points.iter()) {
        let obj_xy = obj.iter().map(|p| [p[0], p[1]]).collect::<Vec<_>>();
        let mut h = find_homography(&obj_xy, img)?;

        // move the principal point to the origin
        for j in 0..3 {
            h[0][j] -= h[2][j] * cx;
            h[1][j] -= h[2][j] * cy;
        }

        let col = |j: usize| [h[0][j], h[1][j], h[2][j]];
        let (h1, h2) = (col(0), col(1));
        let mut d1 = [0.0; 3];
        let mut d2 = [0.0; 3];
        for k in 0..3 {
            d1[k] = (h1[k] + h2[k]) * 0.5;
            d2[k] = (h1[k] - h2[k]) * 0.5;
        }

        let unit = |v: [f64; 3]| {
            let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            if n > f64::EPSILON {
                v.map(|x| x / n)
            } else {
                v
            }
        };
        let (h1, h2, d1, d2) = (unit(h1), unit(h2), unit(d1), unit(d2));

        // h1 . h2 = 0 and d1 . d2 = 0 under the metric diag(1/fx^2, 1/fy^2, 1)
        add_row([h1[0] * h2[0], h1[1] * h2[1]], -h1[2] * h2[2]);
        add_row([d1[0] * d2[0], d1[1] * d2[1]], -d1[2] * d2[2]);
    }

    let det = ata[0][0] * ata[1][1] - ata[0][1] * ata[1][0];
    if det.abs() < f64::EPSILON * (ata[0][0] * ata[1][1]).abs().max(f64::MIN_POSITIVE) {
        return Err(CalibError::Degenerate(
            "views do not constrain the focal length".to_string(),
        ));
    }
    let inv_fx2 = (ata[1][1] * atb[0] - ata[0][1] * atb[1]) / det;
    let inv_fy2 = (ata[0][0] * atb[1] - ata[1][0] * atb[0]) / det;

    let mut fx = (1.0 / inv_fx2.abs()).sqrt();
    let mut fy = (1.0 / inv_fy2.abs()).sqrt();
    if !fx.is_finite() || !fy.is_finite() {
        return Err(CalibError::Degenerate(
            "focal length estimate is not finite".to_string(),
        ));
    }

    if let Some(aspect) = aspect_ratio {
        let f = (fx / aspect + fy) * 0.5;
        fy = f;
        fx = aspect * f;
    }

    log::debug!("initial camera matrix: fx {fx:.2} fy {fy:.2} cx {cx:.2} cy {cy:.2}");

    Ok([[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::board_object_points;
    use crate::linalg::mat33_mul_vec3;
    use crate::transforms::rotation_vector_to_matrix;

    fn view(rvec: [f64; 3], t: [f64; 3], k: &[[f64; 3]; 3]) -> (Vec<[f64; 3]>, Vec<[f64; 2]>) {
        let obj = board_object_points(6, 8, 0.03);
        let r = rotation_vector_to_matrix(&rvec);
        let img = obj
            .iter()
            .map(|p| {
                let q = mat33_mul_vec3(&r, p);
                let q = [q[0] + t[0], q[1] + t[1], q[2] + t[2]];
                let uv = mat33_mul_vec3(k, &[q[0] / q[2], q[1] / q[2], 1.0]);
                [uv[0], uv[1]]
            })
            .collect();
        (obj, img)
    }

    #[test]
    fn test_init_camera_matrix_recovers_focal() -> Result<(), Box<dyn std::error::Error>> {
        let k = [[620.0, 0.0, 319.5], [0.0, 610.0, 239.5], [0.0, 0.0, 1.0]];
        let views = [
            view([0.3, -0.2, 0.05], [-0.1, -0.08, 0.6], &k),
            view([-0.25, 0.3, -0.1], [-0.12, -0.05, 0.7], &k),
            view([0.1, 0.4, 0.02], [-0.05, -0.1, 0.65], &k),
        ];
        let obj = views.iter().map(|v| v.0.clone()).collect::<Vec<_>>();
        let img = views.iter().map(|v| v.1.clone()).collect::<Vec<_>>();

        let m = init_camera_matrix(&obj, &img, [640, 480].into(), None)?;
        assert!((m[0][0] - 620.0).abs() < 1.0, "{m:?}");
        assert!((m[1][1] - 610.0).abs() < 1.0, "{m:?}");
        assert_eq!(m[0][2], 319.5);
        assert_eq!(m[1][2], 239.5);

        let m = init_camera_matrix(&obj, &img, [640, 480].into(), Some(1.0))?;
        assert_eq!(m[0][0], m[1][1]);
        Ok(())
    }

    #[test]
    fn test_init_camera_matrix_no_views() {
        let res = init_camera_matrix(&[], &[], [640, 480].into(), None);
        assert!(matches!(res, Err(CalibError::NotEnoughPoints { .. })));
    }
}
