use stereocal_image::{Image, ImageSize};
use stereocal_imgproc::calibration::distortion::generate_correction_map_polynomial;
use stereocal_imgproc::interpolation::{remap, InterpolationMode};

use super::RectificationModel;
use crate::camera::CameraModel;
use crate::CalibError;

/// Lookup tables from rectified pixels to raw image positions, for one camera.
#[derive(Clone, Debug)]
pub struct RemapTable {
    /// Column in the raw image to sample for each rectified pixel.
    pub map_x: Image<f32, 1>,
    /// Row in the raw image to sample for each rectified pixel.
    pub map_y: Image<f32, 1>,
}

impl RemapTable {
    /// Size of the rectified image.
    pub fn size(&self) -> ImageSize {
        self.map_x.size()
    }

    /// Resample a raw image into its rectified version.
    ///
    /// `dst` must have the size of the table.
    pub fn apply<const C: usize>(
        &self,
        src: &Image<f32, C>,
        dst: &mut Image<f32, C>,
        interpolation: InterpolationMode,
    ) -> Result<(), CalibError> {
        remap(src, dst, &self.map_x, &self.map_y, interpolation)?;
        Ok(())
    }
}

/// Build the undistort and rectify table of a single camera.
///
/// # Arguments
///
/// * `camera` - The raw camera.
/// * `rectification` - Rotation from the raw to the rectified camera frame.
/// * `projection` - Camera matrix of the rectified image.
/// * `size` - Size of the rectified image.
pub fn init_rectify_map(
    camera: &CameraModel,
    rectification: &[[f64; 3]; 3],
    projection: &[[f64; 3]; 3],
    size: ImageSize,
) -> Result<RemapTable, CalibError> {
    let (map_x, map_y) = generate_correction_map_polynomial(
        &camera.intrinsic(),
        rectification,
        projection,
        &camera.distortion,
        &size,
    )?;
    Ok(RemapTable { map_x, map_y })
}

/// Build the tables of both cameras of a rectified pair, in parallel.
pub fn build_remap_tables(
    cameras: &[CameraModel; 2],
    model: &RectificationModel,
) -> Result<[RemapTable; 2], CalibError> {
    let (first, second) = rayon::join(
        || {
            init_rectify_map(
                &cameras[0],
                &model.rectification[0],
                &model.camera_matrix(0),
                model.image_size,
            )
        },
        || {
            init_rectify_map(
                &cameras[1],
                &model.rectification[1],
                &model.camera_matrix(1),
                model.image_size,
            )
        },
    );
    Ok([first?, second?])
}
