use super::{mat33_inverse, mat33_mul, CameraIntrinsic};
use crate::interpolation::grid::meshgrid_from_fn;
use stereocal_image::{Image, ImageError, ImageSize};

/// Maximum number of fixed-point iterations used to invert the distortion model.
const UNDISTORT_MAX_ITERATIONS: usize = 20;

/// Represents the polynomial distortion parameters of a camera
///
/// The radial part is the rational model
/// `(1 + k1 r² + k2 r⁴ + k3 r⁶) / (1 + k4 r² + k5 r⁴ + k6 r⁶)`; with `k4..k6` at zero it
/// reduces to the plain polynomial model.
///
/// # Fields
///
/// * `k1` - The first radial distortion coefficient
/// * `k2` - The second radial distortion coefficient
/// * `k3` - The third radial distortion coefficient
/// * `k4` - The fourth radial distortion coefficient
/// * `k5` - The fifth radial distortion coefficient
/// * `k6` - The sixth radial distortion coefficient
/// * `p1` - The first tangential distortion coefficient
/// * `p2` - The second tangential distortion coefficient
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PolynomialDistortion {
    /// The first radial distortion coefficient
    pub k1: f64,
    /// The second radial distortion coefficient
    pub k2: f64,
    /// The third radial distortion coefficient
    pub k3: f64,
    /// The fourth radial distortion coefficient
    pub k4: f64,
    /// The fifth radial distortion coefficient
    pub k5: f64,
    /// The sixth radial distortion coefficient
    pub k6: f64,
    /// The first tangential distortion coefficient
    pub p1: f64,
    /// The second tangential distortion coefficient
    pub p2: f64,
}

impl PolynomialDistortion {
    /// Build the model from a coefficient vector in `[k1, k2, p1, p2, k3, k4, k5, k6]` order.
    ///
    /// Missing trailing coefficients are zero, extra ones are ignored.
    pub fn from_coefficients(coeffs: &[f64]) -> Self {
        let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Self {
            k1: c(0),
            k2: c(1),
            p1: c(2),
            p2: c(3),
            k3: c(4),
            k4: c(5),
            k5: c(6),
            k6: c(7),
        }
    }

    /// The coefficient vector in `[k1, k2, p1, p2, k3, k4, k5, k6]` order.
    pub fn coefficients(&self) -> [f64; 8] {
        [
            self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6,
        ]
    }

    /// Whether the denominator of the rational model is active.
    pub fn is_rational(&self) -> bool {
        self.k4 != 0.0 || self.k5 != 0.0 || self.k6 != 0.0
    }
}

/// Distort a point given in normalized camera coordinates.
///
/// # Arguments
///
/// * `x` - The x coordinate on the normalized image plane
/// * `y` - The y coordinate on the normalized image plane
/// * `distortion` - The distortion parameters of the camera
///
/// # Returns
///
/// The distorted normalized coordinates.
pub fn distort_normalized(x: f64, y: f64, distortion: &PolynomialDistortion) -> (f64, f64) {
    let d = distortion;

    let r2 = x * x + y * y;
    let kr = (1.0 + ((d.k3 * r2 + d.k2) * r2 + d.k1) * r2)
        / (1.0 + ((d.k6 * r2 + d.k5) * r2 + d.k4) * r2);

    let xd = x * kr + 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
    let yd = y * kr + d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;

    (xd, yd)
}

/// Distort a point using polynomial distortion
///
/// # Arguments
///
/// * `x` - The x coordinate of the ideal pixel
/// * `y` - The y coordinate of the ideal pixel
/// * `intrinsic` - The intrinsic parameters of the camera
/// * `distortion` - The distortion parameters of the camera
///
/// # Returns
///
/// * `x` - The x coordinate of the distorted point
/// * `y` - The y coordinate of the distorted point
pub fn distort_point_polynomial(
    x: f64,
    y: f64,
    intrinsic: &CameraIntrinsic,
    distortion: &PolynomialDistortion,
) -> (f64, f64) {
    let (fx, fy, cx, cy) = (intrinsic.fx, intrinsic.fy, intrinsic.cx, intrinsic.cy);

    let (xd, yd) = distort_normalized((x - cx) / fx, (y - cy) / fy, distortion);

    (fx * xd + cx, fy * yd + cy)
}

/// Invert the distortion model for a normalized point by fixed-point iteration.
pub fn undistort_normalized(xd: f64, yd: f64, distortion: &PolynomialDistortion) -> (f64, f64) {
    let d = distortion;
    let (mut x, mut y) = (xd, yd);

    for _ in 0..UNDISTORT_MAX_ITERATIONS {
        let r2 = x * x + y * y;
        let icdist = (1.0 + ((d.k6 * r2 + d.k5) * r2 + d.k4) * r2)
            / (1.0 + ((d.k3 * r2 + d.k2) * r2 + d.k1) * r2);
        let delta_x = 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
        let delta_y = d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;

        let nx = (xd - delta_x) * icdist;
        let ny = (yd - delta_y) * icdist;
        let step = (nx - x).abs() + (ny - y).abs();
        (x, y) = (nx, ny);

        if !step.is_finite() || step < 1e-14 {
            break;
        }
    }

    (x, y)
}

/// Computes the ideal point coordinates from the observed (distorted) pixel coordinates.
///
/// The points are undistorted to the normalized image plane, optionally rotated by
/// `rectification` and finally projected with `projection` (the left 3x3 block of a
/// projection matrix). Without a projection the normalized coordinates are returned.
///
/// # Arguments
///
/// * `points` - Observed pixel coordinates.
/// * `intrinsic` - Intrinsics of the camera that observed the points.
/// * `distortion` - Distortion of the camera that observed the points.
/// * `rectification` - Optional rotation applied in normalized space.
/// * `projection` - Optional new camera matrix.
pub fn undistort_points(
    points: &[[f64; 2]],
    intrinsic: &CameraIntrinsic,
    distortion: &PolynomialDistortion,
    rectification: Option<&[[f64; 3]; 3]>,
    projection: Option<&[[f64; 3]; 3]>,
) -> Vec<[f64; 2]> {
    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    let r = rectification.unwrap_or(&IDENTITY);
    let rr = match projection {
        Some(p) => mat33_mul(p, r),
        None => *r,
    };

    points
        .iter()
        .map(|&[u, v]| {
            let (x, y) = undistort_normalized(
                (u - intrinsic.cx) / intrinsic.fx,
                (v - intrinsic.cy) / intrinsic.fy,
                distortion,
            );
            let xx = rr[0][0] * x + rr[0][1] * y + rr[0][2];
            let yy = rr[1][0] * x + rr[1][1] * y + rr[1][2];
            let ww = rr[2][0] * x + rr[2][1] * y + rr[2][2];
            let w_inv = if ww.abs() > f64::EPSILON { 1.0 / ww } else { 1.0 };
            [xx * w_inv, yy * w_inv]
        })
        .collect()
}

/// Generate the undistort and rectify map for a polynomial distortion model
///
/// For each pixel of the output image the map stores the location in the raw image
/// to sample from: the pixel is back-projected through `new_projection`, rotated
/// back by `rectification`, distorted and projected through `intrinsic`.
///
/// # Arguments
///
/// * `intrinsic` - The intrinsic parameters of the camera
/// * `rectification` - The rectification rotation of the camera
/// * `new_projection` - The 3x3 camera matrix of the output image
/// * `distortion` - The distortion parameters of the camera
/// * `size` - The size of the output image
///
/// # Returns
///
/// * `map_x` - The x map for undistorting and rectifying the image
/// * `map_y` - The y map for undistorting and rectifying the image
///
/// # Errors
///
/// Fails if `new_projection * rectification` is singular or the size is empty.
pub fn generate_correction_map_polynomial(
    intrinsic: &CameraIntrinsic,
    rectification: &[[f64; 3]; 3],
    new_projection: &[[f64; 3]; 3],
    distortion: &PolynomialDistortion,
    size: &ImageSize,
) -> Result<(Image<f32, 1>, Image<f32, 1>), ImageError> {
    let ir = mat33_inverse(&mat33_mul(new_projection, rectification)).ok_or_else(|| {
        ImageError::InvalidParameter(
            "new_projection",
            "projection times rectification is singular".to_string(),
        )
    })?;

    meshgrid_from_fn(*size, |u, v| {
        let (u, v) = (u as f64, v as f64);
        let x = ir[0][0] * u + ir[0][1] * v + ir[0][2];
        let y = ir[1][0] * u + ir[1][1] * v + ir[1][2];
        let w = ir[2][0] * u + ir[2][1] * v + ir[2][2];

        let (xd, yd) = distort_normalized(x / w, y / w, distortion);

        let map_x = intrinsic.fx * xd + intrinsic.cx;
        let map_y = intrinsic.fy * yd + intrinsic.cy;
        Ok((map_x as f32, map_y as f32))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    fn intrinsic() -> CameraIntrinsic {
        CameraIntrinsic {
            fx: 577.48583984375,
            fy: 652.8748779296875,
            cx: 317.48583984375,
            cy: 246.1428833007813,
        }
    }

    fn distortion() -> PolynomialDistortion {
        PolynomialDistortion {
            k1: -0.2547749280929563,
            k2: 0.0697926277667284,
            k3: -0.007250492945313457,
            k4: 0.0,
            k5: 0.0,
            k6: 0.0,
            p1: -0.00054577434639213,
            p2: 0.0003006766564794816,
        }
    }

    #[test]
    fn test_coefficients_order() {
        let d = PolynomialDistortion::from_coefficients(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(d.k1, 0.1);
        assert_eq!(d.p1, 0.3);
        assert_eq!(d.k3, 0.5);
        assert_eq!(d.k6, 0.0);
        assert!(!d.is_rational());
        assert_eq!(d.coefficients(), [0.1, 0.2, 0.3, 0.4, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_distort_center_is_fixed() {
        let k = intrinsic();
        let (x, y) = distort_point_polynomial(k.cx, k.cy, &k, &distortion());
        assert_relative_eq!(x, k.cx);
        assert_relative_eq!(y, k.cy);
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let k = intrinsic();
        let d = distortion();

        let ideal = [[100.0, 20.0], [500.0, 400.0], [320.0, 50.0]];
        let distorted = ideal
            .iter()
            .map(|&[x, y]| {
                let (u, v) = distort_point_polynomial(x, y, &k, &d);
                [u, v]
            })
            .collect::<Vec<_>>();

        let kmat = k.to_matrix();
        let recovered = undistort_points(&distorted, &k, &d, None, Some(&kmat));
        for (r, i) in recovered.iter().zip(ideal.iter()) {
            assert_relative_eq!(r[0], i[0], epsilon = 1e-6);
            assert_relative_eq!(r[1], i[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_undistort_rectify_map_identity() -> Result<(), ImageError> {
        let k = intrinsic();
        let size = ImageSize {
            width: 8,
            height: 4,
        };

        let (map_x, map_y) = generate_correction_map_polynomial(
            &k,
            &IDENTITY,
            &k.to_matrix(),
            &PolynomialDistortion::default(),
            &size,
        )?;

        assert_eq!(map_x.size(), size);
        assert_eq!(map_y.size(), size);
        for y in 0..4 {
            for x in 0..8 {
                assert_relative_eq!(*map_x.get_pixel(x, y, 0)?, x as f32, epsilon = 1e-3);
                assert_relative_eq!(*map_y.get_pixel(x, y, 0)?, y as f32, epsilon = 1e-3);
            }
        }

        Ok(())
    }

    #[test]
    fn test_undistort_rectify_map_matches_distort() -> Result<(), ImageError> {
        let k = intrinsic();
        let d = distortion();
        let size = ImageSize {
            width: 16,
            height: 12,
        };

        let (map_x, map_y) =
            generate_correction_map_polynomial(&k, &IDENTITY, &k.to_matrix(), &d, &size)?;

        let (x, y) = distort_point_polynomial(10.0, 3.0, &k, &d);
        assert_relative_eq!(*map_x.get_pixel(10, 3, 0)? as f64, x, epsilon = 1e-3);
        assert_relative_eq!(*map_y.get_pixel(10, 3, 0)? as f64, y, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_singular_projection() {
        let zero = [[0.0; 3]; 3];
        let res = generate_correction_map_polynomial(
            &intrinsic(),
            &IDENTITY,
            &zero,
            &PolynomialDistortion::default(),
            &ImageSize {
                width: 2,
                height: 2,
            },
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_mat33_inverse() {
        let m = [[2.0, 0.0, 1.0], [0.0, 3.0, 0.0], [1.0, 0.0, 1.0]];
        let inv = mat33_inverse(&m).expect("invertible");
        let id = mat33_mul(&m, &inv);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(id[i][j], IDENTITY[i][j], epsilon = 1e-12);
            }
        }
    }
}
