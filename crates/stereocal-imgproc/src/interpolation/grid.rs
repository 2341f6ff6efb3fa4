use stereocal_image::{Image, ImageError, ImageSize};

use crate::parallel;

/// Create a meshgrid whose values are computed from the pixel coordinates.
///
/// The closure is evaluated once per pixel, in parallel over rows.
///
/// # Errors
///
/// Returns the first error produced by the closure, or an error if the size is empty.
pub fn meshgrid_from_fn(
    size: ImageSize,
    f: impl Fn(usize, usize) -> Result<(f32, f32), ImageError> + Send + Sync,
) -> Result<(Image<f32, 1>, Image<f32, 1>), ImageError> {
    if size.width == 0 || size.height == 0 {
        return Err(ImageError::EmptyImage(size.width, size.height));
    }

    let mut map_x = Image::from_size_val(size, 0.0f32)?;
    let mut map_y = Image::from_size_val(size, 0.0f32)?;

    let failure = std::sync::Mutex::new(None);
    parallel::par_fill_maps(&mut map_x, &mut map_y, |x, y| match f(x, y) {
        Ok(v) => v,
        Err(e) => {
            if let Ok(mut slot) = failure.lock() {
                slot.get_or_insert(e);
            }
            (f32::NAN, f32::NAN)
        }
    });

    if let Some(e) = failure.into_inner().ok().flatten() {
        return Err(e);
    }

    Ok((map_x, map_y))
}
