use super::TermCriteria;
use crate::interpolation::{interpolate_pixel, InterpolationMode};
use stereocal_image::{Image, ImageError};

/// Parameters of the sub-pixel corner refinement.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubPixParams {
    /// Half side of the search window; the window is `2 * half_window + 1` pixels wide.
    pub half_window: usize,
    /// Stopping rule of the per-corner iteration.
    pub criteria: TermCriteria,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            criteria: TermCriteria::new(30, 0.01),
        }
    }
}

impl SubPixParams {
    /// Set the half side of the search window.
    pub fn with_half_window(mut self, half_window: usize) -> Self {
        self.half_window = half_window;
        self
    }

    /// Set the stopping rule.
    pub fn with_criteria(mut self, criteria: TermCriteria) -> Self {
        self.criteria = criteria;
        self
    }
}

/// Sample a square patch of side `side` centred on `(cx, cy)` with replicated borders.
fn sample_patch(image: &Image<f32, 1>, cx: f64, cy: f64, side: usize) -> Vec<f64> {
    let half = (side / 2) as f64;
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;

    let mut patch = Vec::with_capacity(side * side);
    for i in 0..side {
        let y = (cy - half + i as f64) as f32;
        for j in 0..side {
            let x = (cx - half + j as f64) as f32;
            let [v] = interpolate_pixel(
                image,
                x.clamp(0.0, max_x),
                y.clamp(0.0, max_y),
                InterpolationMode::Bilinear,
            );
            patch.push(v as f64);
        }
    }
    patch
}

/// Refine corner locations to sub-pixel accuracy.
///
/// Every corner is moved to the point where the image gradients in a Gaussian
/// weighted window are orthogonal to the vectors joining it with the window pixels.
/// A corner is reset to its initial position if the refinement leaves the window.
///
/// # Arguments
///
/// * `image` - The grayscale image the corners were detected in.
/// * `corners` - Initial corner estimates, refined in place.
/// * `params` - Window size and stopping rule.
///
/// # Errors
///
/// Fails if the image is empty or the window is zero sized.
pub fn corner_sub_pix(
    image: &Image<f32, 1>,
    corners: &mut [[f64; 2]],
    params: &SubPixParams,
) -> Result<(), ImageError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ImageError::EmptyImage(image.width(), image.height()));
    }

    let half = params.half_window;
    if half == 0 {
        return Err(ImageError::InvalidParameter(
            "half_window",
            "the search window must be at least 3x3".to_string(),
        ));
    }

    let win = 2 * half + 1;
    let eps = params.criteria.epsilon.max(0.0).powi(2);
    let max_iters = params.criteria.max_iterations.max(1);

    let mask = (0..win)
        .flat_map(|i| {
            let y = (i as f64 - half as f64) / half as f64;
            (0..win).map(move |j| {
                let x = (j as f64 - half as f64) / half as f64;
                (-y * y).exp() * (-x * x).exp()
            })
        })
        .collect::<Vec<_>>();

    let (w, h) = (image.width() as f64, image.height() as f64);

    for corner in corners.iter_mut() {
        let start = *corner;
        let mut ci = start;
        let mut iter = 0;

        loop {
            // patch with a one pixel margin for the central differences
            let patch = sample_patch(image, ci[0], ci[1], win + 2);
            let stride = win + 2;

            let (mut a, mut b, mut c, mut bb1, mut bb2) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for i in 0..win {
                let py = i as f64 - half as f64;
                for j in 0..win {
                    let px = j as f64 - half as f64;
                    let m = mask[i * win + j];
                    let tgx = patch[(i + 1) * stride + j + 2] - patch[(i + 1) * stride + j];
                    let tgy = patch[(i + 2) * stride + j + 1] - patch[i * stride + j + 1];
                    let gxx = tgx * tgx * m;
                    let gxy = tgx * tgy * m;
                    let gyy = tgy * tgy * m;
                    a += gxx;
                    b += gxy;
                    c += gyy;
                    bb1 += gxx * px + gxy * py;
                    bb2 += gxy * px + gyy * py;
                }
            }

            let det = a * c - b * b;
            if det.abs() <= f64::EPSILON * f64::EPSILON {
                break;
            }

            let scale = 1.0 / det;
            let next = [
                ci[0] + c * scale * bb1 - b * scale * bb2,
                ci[1] - b * scale * bb1 + a * scale * bb2,
            ];
            let err = (next[0] - ci[0]).powi(2) + (next[1] - ci[1]).powi(2);
            ci = next;

            if ci[0] < 0.0 || ci[0] >= w || ci[1] < 0.0 || ci[1] >= h {
                break;
            }

            iter += 1;
            if iter >= max_iters || err <= eps {
                break;
            }
        }

        if (ci[0] - start[0]).abs() > half as f64 || (ci[1] - start[1]).abs() > half as f64 {
            ci = start;
        }

        *corner = ci;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocal_image::ImageSize;

    /// Render a 2x2 checker corner at `(x0, y0)` with 4x4 supersampling.
    fn checker_corner(size: usize, x0: f64, y0: f64) -> Result<Image<f32, 1>, ImageError> {
        let mut data = vec![0.0f32; size * size];
        for y in 0..size {
            for x in 0..size {
                let mut acc = 0.0;
                for sy in 0..4 {
                    for sx in 0..4 {
                        let u = x as f64 - 0.5 + (sx as f64 + 0.5) / 4.0;
                        let v = y as f64 - 0.5 + (sy as f64 + 0.5) / 4.0;
                        if (u < x0) == (v < y0) {
                            acc += 255.0;
                        }
                    }
                }
                data[y * size + x] = acc / 16.0;
            }
        }
        Image::new(
            ImageSize {
                width: size,
                height: size,
            },
            data,
        )
    }

    #[test]
    fn test_corner_sub_pix_converges() -> Result<(), ImageError> {
        let image = checker_corner(32, 15.3, 16.7)?;
        let mut corners = [[14.0, 18.0]];
        corner_sub_pix(&image, &mut corners, &SubPixParams::default())?;
        assert!((corners[0][0] - 15.3).abs() < 0.1, "{:?}", corners);
        assert!((corners[0][1] - 16.7).abs() < 0.1, "{:?}", corners);
        Ok(())
    }

    #[test]
    fn test_corner_sub_pix_flat_keeps_point() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::from_size_val([20, 20].into(), 128.0)?;
        let mut corners = [[10.0, 10.0]];
        corner_sub_pix(&image, &mut corners, &SubPixParams::default())?;
        assert_eq!(corners[0], [10.0, 10.0]);
        Ok(())
    }

    #[test]
    fn test_corner_sub_pix_zero_window() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::from_size_val([20, 20].into(), 128.0)?;
        let mut corners = [[10.0, 10.0]];
        let params = SubPixParams::default().with_half_window(0);
        assert!(corner_sub_pix(&image, &mut corners, &params).is_err());
        Ok(())
    }
}
