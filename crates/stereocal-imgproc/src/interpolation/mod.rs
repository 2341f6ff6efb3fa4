//! Pixel interpolation methods for image resampling.
//!
//! - **Nearest**: uses the nearest pixel value
//! - **Bilinear**: linear interpolation between the four neighbouring pixels
//!
//! Samples that fall outside the source image read as zero (constant border).

mod bilinear;

/// Grid generation and coordinate mapping utilities.
pub mod grid;

pub(crate) mod interpolate;
mod nearest;
mod remap;

pub use interpolate::{interpolate_pixel, InterpolationMode};
pub use remap::remap;

/// Whether `(u, v)` lies within half a pixel of the image support.
#[inline]
pub(crate) fn in_support(u: f32, v: f32, cols: usize, rows: usize) -> bool {
    u.is_finite()
        && v.is_finite()
        && u > -0.5
        && v > -0.5
        && u < cols as f32 - 0.5
        && v < rows as f32 - 0.5
}
