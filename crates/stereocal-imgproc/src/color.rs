use stereocal_image::{Image, ImageError};

use crate::parallel;

/// Replicate a grayscale image into the three channels of an RGB image.
///
/// # Example
///
/// ```
/// use stereocal_image::{Image, ImageSize};
/// use stereocal_imgproc::color::rgb_from_gray;
///
/// let gray = Image::<u8, 1>::new(ImageSize { width: 2, height: 1 }, vec![10, 20]).unwrap();
/// let mut rgb = Image::<u8, 3>::from_size_val(gray.size(), 0).unwrap();
///
/// rgb_from_gray(&gray, &mut rgb).unwrap();
/// assert_eq!(rgb.as_slice(), &[10, 10, 10, 20, 20, 20]);
/// ```
pub fn rgb_from_gray<T>(src: &Image<T, 1>, dst: &mut Image<T, 3>) -> Result<(), ImageError>
where
    T: Copy + Send + Sync,
{
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    if src.width() == 0 || src.height() == 0 {
        return Ok(());
    }

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        dst_pixel.fill(src_pixel[0]);
    });

    Ok(())
}
