#![deny(missing_docs)]
//! Stereo camera calibration and rectification from checkerboard image pairs.
//!
//! The pipeline validates image pairs, solves both cameras and their relative pose,
//! measures the epipolar error and builds the rectification with its remap tables.
//! [`session::CalibrationSession`] runs the stages in order.

#[doc(inline)]
pub use stereocal_image as image;

#[doc(inline)]
pub use stereocal_imgproc as imgproc;

#[doc(inline)]
pub use stereocal_3d as k3d;

/// Calibration outputs ready for serialization.
pub mod artifacts;

/// Configuration of a calibration run.
pub mod config;

mod error;
pub use error::*;

/// Image loading collaborators.
pub mod loader;

pub mod session;

/// Image pair validation and dataset assembly.
pub mod validator;

pub mod visualize;
