use stereocal_image::{Image, ImageError};

use crate::parallel;

/// Dilate a single channel `u8` image with a 3x3 square structuring element.
///
/// Each output pixel is the maximum over its 8-neighbourhood. The operation is
/// repeated `iterations` times; zero iterations copies the input.
///
/// # Arguments
///
/// * `src` - The input image.
/// * `dst` - The output image with the same size as `src`.
/// * `iterations` - Number of times the dilation is applied.
pub fn dilate(src: &Image<u8, 1>, dst: &mut Image<u8, 1>, iterations: usize) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    dst.as_slice_mut().copy_from_slice(src.as_slice());
    if src.width() == 0 || src.height() == 0 {
        return Ok(());
    }

    let (w, h) = (src.width(), src.height());
    let mut scratch = dst.clone();

    for _ in 0..iterations {
        {
            let prev = scratch.as_slice();
            parallel::par_iter_rows_indexed(dst, |x, y, out| {
                let mut m = 0u8;
                for yy in y.saturating_sub(1)..(y + 2).min(h) {
                    for xx in x.saturating_sub(1)..(x + 2).min(w) {
                        m = m.max(prev[yy * w + xx]);
                    }
                }
                out[0] = m;
            });
        }
        scratch.as_slice_mut().copy_from_slice(dst.as_slice());
    }

    Ok(())
}
