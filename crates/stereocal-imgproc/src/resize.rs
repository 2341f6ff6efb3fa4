use crate::interpolation::{grid::meshgrid_from_fn, remap, InterpolationMode};
use stereocal_image::{Image, ImageError};

/// Resize an image to a new size.
///
/// Uses the pixel-centre convention: destination pixel `x` samples the source at
/// `(x + 0.5) * src_w / dst_w - 0.5`, clamped to the image.
///
/// # Arguments
///
/// * `src` - The input image container.
/// * `dst` - The output image container, whose size is the target size.
/// * `interpolation` - The interpolation mode to use.
///
/// # Example
///
/// ```
/// use stereocal_image::{Image, ImageSize};
/// use stereocal_imgproc::resize::resize_native;
/// use stereocal_imgproc::interpolation::InterpolationMode;
///
/// let image = Image::<_, 1>::new(
///     ImageSize { width: 4, height: 5 },
///     vec![0f32; 4 * 5],
/// )
/// .unwrap();
///
/// let mut image_resized = Image::<_, 1>::from_size_val(
///     ImageSize { width: 8, height: 10 },
///     0.0,
/// )
/// .unwrap();
///
/// resize_native(&image, &mut image_resized, InterpolationMode::Bilinear).unwrap();
///
/// assert_eq!(image_resized.size().width, 8);
/// assert_eq!(image_resized.size().height, 10);
/// ```
pub fn resize_native<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    interpolation: InterpolationMode,
) -> Result<(), ImageError> {
    if src.width() == 0 || src.height() == 0 {
        return Err(ImageError::EmptyImage(src.width(), src.height()));
    }

    // same size, copy the data
    if src.size() == dst.size() {
        dst.as_slice_mut().copy_from_slice(src.as_slice());
        return Ok(());
    }

    let sx = src.width() as f32 / dst.width() as f32;
    let sy = src.height() as f32 / dst.height() as f32;
    let (max_x, max_y) = ((src.width() - 1) as f32, (src.height() - 1) as f32);

    let (map_x, map_y) = meshgrid_from_fn(dst.size(), |x, y| {
        let u = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x);
        let v = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y);
        Ok((u, v))
    })?;

    remap(src, dst, &map_x, &map_y, interpolation)
}

/// Upscale an image by an integer factor.
///
/// # Errors
///
/// Returns an error if the factor is zero.
pub fn upscale<const C: usize>(
    src: &Image<f32, C>,
    factor: usize,
) -> Result<Image<f32, C>, ImageError> {
    if factor == 0 {
        return Err(ImageError::InvalidParameter(
            "factor",
            "upscale factor must be positive".to_string(),
        ));
    }

    let new_size = [src.width() * factor, src.height() * factor].into();
    let mut dst = Image::from_size_val(new_size, 0.0)?;
    resize_native(src, &mut dst, InterpolationMode::Bilinear)?;

    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereocal_image::ImageSize;

    #[test]
    fn resize_constant() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::from_size_val(
            ImageSize {
                width: 4,
                height: 3,
            },
            7.0,
        )?;
        let up = upscale(&image, 2)?;
        assert_eq!(up.size(), [8, 6].into());
        assert!(up.as_slice().iter().all(|&v| (v - 7.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn resize_preserves_ramp() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::new([4, 1].into(), vec![0.0, 1.0, 2.0, 3.0])?;
        let up = upscale(&image, 2)?;
        // interior samples fall between the source pixels
        assert!((up.as_slice()[2] - 0.75).abs() < 1e-6);
        assert!((up.as_slice()[3] - 1.25).abs() < 1e-6);
        assert!(upscale(&image, 0).is_err());
        Ok(())
    }
}
