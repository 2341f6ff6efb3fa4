//! Intensity normalization used before binarization.

use stereocal_image::{Image, ImageError};

use crate::parallel;

/// Equalize the histogram of a single channel image with values in `[0, 255]`.
///
/// Values are binned to the nearest integer level. The output spreads the cumulative
/// distribution over the full `[0, 255]` range.
///
/// # Arguments
///
/// * `src` - The input image with intensities in `[0, 255]`.
/// * `dst` - The output image with the same size as `src`.
///
/// # Example
///
/// ```
/// use stereocal_image::{Image, ImageSize};
/// use stereocal_imgproc::normalize::equalize_histogram;
///
/// let image = Image::<f32, 1>::new(
///     ImageSize { width: 2, height: 2 },
///     vec![100.0, 100.0, 110.0, 110.0],
/// ).unwrap();
///
/// let mut equalized = Image::<f32, 1>::from_size_val(image.size(), 0.0).unwrap();
/// equalize_histogram(&image, &mut equalized).unwrap();
///
/// assert_eq!(equalized.as_slice(), &[0.0, 0.0, 255.0, 255.0]);
/// ```
pub fn equalize_histogram(src: &Image<f32, 1>, dst: &mut Image<f32, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let bin = |v: f32| v.round().clamp(0.0, 255.0) as usize;

    let mut hist = [0usize; 256];
    for &v in src.as_slice() {
        hist[bin(v)] += 1;
    }

    let total = src.as_slice().len();
    let first = hist.iter().copied().find(|&h| h > 0).unwrap_or(0);

    // flat image, nothing to spread
    if total == first {
        dst.as_slice_mut().copy_from_slice(src.as_slice());
        return Ok(());
    }

    let scale = 255.0 / (total - first) as f32;
    let mut lut = [0.0f32; 256];
    let mut acc = 0usize;
    for (level, &h) in hist.iter().enumerate() {
        acc += h;
        lut[level] = (acc.saturating_sub(first) as f32 * scale).round();
    }

    parallel::par_iter_rows_val(src, dst, |s, d| *d = lut[bin(*s)]);

    Ok(())
}
