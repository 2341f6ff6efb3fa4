//! Epipolar rectification of a stereo pair.
//!
//! A [`RectificationStrategy`] turns the two camera models into a
//! [`RectificationModel`]: a rotation and a new projection per camera such that
//! corresponding points end up on the same image row (or column for vertical rigs).
//! The remap tables that resample raw images into rectified ones are built from the
//! model with [`build_remap_tables`].

use stereocal_image::ImageSize;

use crate::camera::CameraModel;
use crate::CalibError;

mod calibrated;
pub use calibrated::*;

mod maps;
pub use maps::*;

mod uncalibrated;
pub use uncalibrated::*;

/// An axis aligned pixel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoiRect {
    /// Left column.
    pub x: usize,
    /// Top row.
    pub y: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

impl RoiRect {
    /// Whether the rectangle covers no pixel.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The rectangle covering a whole image.
    pub fn full(size: ImageSize) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }
}

/// Rectifying transforms of a stereo pair.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RectificationModel {
    /// Rectification rotations `R1`, `R2` of the first and second camera.
    pub rectification: [[[f64; 3]; 3]; 2],
    /// Projection matrices `P1`, `P2` (3x4) in the rectified frames.
    pub projection: [[[f64; 4]; 3]; 2],
    /// Disparity to depth matrix `Q`, only defined for calibrated rigs.
    pub disparity_to_depth: Option<[[f64; 4]; 4]>,
    /// Valid pixel rectangle of each rectified image, calibrated rigs only.
    pub valid_roi: Option<[RoiRect; 2]>,
    /// Size of the rectified images.
    pub image_size: ImageSize,
}

impl RectificationModel {
    /// Whether the cameras are stacked vertically.
    ///
    /// Epipolar lines are then vertical instead of horizontal.
    pub fn is_vertical_stereo(&self) -> bool {
        let p2 = &self.projection[1];
        p2[1][3].abs() > p2[0][3].abs()
    }

    /// Left 3x3 block of the projection of camera `k`.
    pub fn camera_matrix(&self, k: usize) -> [[f64; 3]; 3] {
        projection_block(&self.projection[k])
    }
}

/// Left 3x3 block of a 3x4 projection matrix.
pub fn projection_block(p: &[[f64; 4]; 3]) -> [[f64; 3]; 3] {
    [
        [p[0][0], p[0][1], p[0][2]],
        [p[1][0], p[1][1], p[1][2]],
        [p[2][0], p[2][1], p[2][2]],
    ]
}

/// A way of computing the rectifying transforms of a stereo pair.
pub trait RectificationStrategy: Send + Sync {
    /// Compute the rectification for two cameras and an image size.
    fn rectify(
        &self,
        cameras: &[CameraModel; 2],
        image_size: ImageSize,
    ) -> Result<RectificationModel, CalibError>;

    /// Whether the strategy uses the metric calibration of the rig.
    fn is_calibrated(&self) -> bool;
}
