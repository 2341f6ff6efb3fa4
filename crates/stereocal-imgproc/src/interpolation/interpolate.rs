use super::bilinear::bilinear_interpolation;
use super::nearest::nearest_neighbor_interpolation;
use stereocal_image::Image;

/// Interpolation mode for resampling operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum InterpolationMode {
    /// Bilinear interpolation
    #[default]
    Bilinear,
    /// Nearest neighbor interpolation
    Nearest,
}

/// Kernel for interpolating a pixel value
///
/// # Arguments
///
/// * `image` - The input image container with shape (height, width, C).
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
/// * `interpolation` - The interpolation mode to use.
///
/// # Returns
///
/// The interpolated pixel values.
pub fn interpolate_pixel<const C: usize>(
    image: &Image<f32, C>,
    u: f32,
    v: f32,
    interpolation: InterpolationMode,
) -> [f32; C] {
    match interpolation {
        InterpolationMode::Bilinear => bilinear_interpolation(image, u, v),
        InterpolationMode::Nearest => nearest_neighbor_interpolation(image, u, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocal_image::{ImageError, ImageSize};

    #[test]
    fn test_interpolate_modes() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::new(
            ImageSize {
                width: 2,
                height: 2,
            },
            vec![0.0, 10.0, 20.0, 30.0],
        )?;

        let [b] = interpolate_pixel(&image, 0.5, 0.5, InterpolationMode::Bilinear);
        assert!((b - 15.0).abs() < 1e-6);

        let [n] = interpolate_pixel(&image, 0.8, 0.2, InterpolationMode::Nearest);
        assert_eq!(n, 10.0);

        let [out] = interpolate_pixel(&image, -3.0, 0.0, InterpolationMode::Bilinear);
        assert_eq!(out, 0.0);
        Ok(())
    }
}
