#![deny(missing_docs)]
//! Image types used across the stereo calibration crates

/// image representation for computer vision purposes.
pub mod image;

/// Error types for the image module.
pub mod error;

/// Free-function image operations.
pub mod ops;

pub use crate::error::ImageError;
pub use crate::image::{Image, ImageSize};
