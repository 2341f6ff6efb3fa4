use stereocal_image::{Image, ImageError};

use crate::parallel;

/// Compute the summed-area table of a single channel image.
///
/// The table has one extra row and column of zeros so that
/// `table[(y + 1) * (w + 1) + (x + 1)]` holds the sum over `[0, x] x [0, y]`.
fn integral_image(src: &Image<f32, 1>) -> Vec<f64> {
    let (w, h) = (src.width(), src.height());
    let stride = w + 1;
    let mut table = vec![0.0f64; stride * (h + 1)];
    let data = src.as_slice();

    for y in 0..h {
        let mut row_sum = 0.0;
        for x in 0..w {
            row_sum += data[y * w + x] as f64;
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
        }
    }

    table
}

/// Apply an adaptive mean threshold to a single channel image.
///
/// A pixel is set to `max_value` when it is brighter than the mean of its
/// `block_size x block_size` neighbourhood minus `offset`, and to zero otherwise.
/// The neighbourhood is clipped at the image border.
///
/// # Arguments
///
/// * `src` - The input image.
/// * `dst` - The binary output image with the same size as `src`.
/// * `block_size` - Side of the averaging window, must be odd and at least 3.
/// * `offset` - Constant subtracted from the local mean.
/// * `max_value` - The value written for foreground pixels.
///
/// # Example
///
/// ```
/// use stereocal_image::{Image, ImageSize};
/// use stereocal_imgproc::threshold::adaptive_threshold_mean;
///
/// let image = Image::<f32, 1>::new(
///     ImageSize { width: 3, height: 1 },
///     vec![0.0, 255.0, 0.0],
/// ).unwrap();
///
/// let mut binary = Image::<u8, 1>::from_size_val(image.size(), 0).unwrap();
/// adaptive_threshold_mean(&image, &mut binary, 3, 0.0, 255).unwrap();
///
/// assert_eq!(binary.as_slice(), &[0, 255, 0]);
/// ```
pub fn adaptive_threshold_mean(
    src: &Image<f32, 1>,
    dst: &mut Image<u8, 1>,
    block_size: usize,
    offset: f32,
    max_value: u8,
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    if block_size < 3 || block_size % 2 == 0 {
        return Err(ImageError::InvalidParameter(
            "block_size",
            format!("must be odd and >= 3, got {block_size}"),
        ));
    }

    let (w, h) = (src.width(), src.height());
    if w == 0 || h == 0 {
        return Err(ImageError::EmptyImage(w, h));
    }

    let stride = w + 1;
    let table = integral_image(src);
    let radius = block_size / 2;
    let data = src.as_slice();

    parallel::par_iter_rows_indexed(dst, |x, y, out| {
        let (x0, x1) = (x.saturating_sub(radius), (x + radius + 1).min(w));
        let (y0, y1) = (y.saturating_sub(radius), (y + radius + 1).min(h));
        let sum = table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0]
            + table[y0 * stride + x0];
        let mean = sum / ((x1 - x0) * (y1 - y0)) as f64;
        out[0] = if data[y * w + x] as f64 > mean - offset as f64 {
            max_value
        } else {
            0
        };
    });

    Ok(())
}
