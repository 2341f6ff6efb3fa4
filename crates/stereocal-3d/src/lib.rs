#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Camera calibration: target model, intrinsic seeding and the stereo solver.
pub mod calib;

/// Pinhole camera with polynomial lens distortion.
pub mod camera;

mod error;
pub use error::CalibError;

/// Linear algebra utilities.
pub mod linalg;

/// Non-linear least squares optimization.
pub mod optim;

/// Pose estimation algorithms.
pub mod pose;

/// Stereo rectification and remap tables.
pub mod rectify;

/// 3D transforms algorithms.
pub mod transforms;
