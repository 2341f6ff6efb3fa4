//! Inspection canvases for detections and rectified pairs.
//!
//! Nothing here feeds back into the calibration.

use stereocal_3d::rectify::{RectificationModel, RemapTable};
use stereocal_image::{Image, ImageSize};
use stereocal_imgproc::calibration::chessboard::{draw_chessboard_corners, PatternSize};
use stereocal_imgproc::color::rgb_from_gray;
use stereocal_imgproc::draw::{draw_line, draw_rect};
use stereocal_imgproc::interpolation::InterpolationMode;
use stereocal_imgproc::resize::resize_native;

use crate::error::StereoCalibError;

/// Longest side of a side by side canvas cell, in pixels.
pub const SIDE_BY_SIDE_BUDGET: f64 = 600.0;
/// Longest side of a stacked canvas cell, in pixels.
pub const STACKED_BUDGET: f64 = 300.0;
/// Spacing of the epipolar guide lines, in pixels.
pub const GUIDE_LINE_SPACING: usize = 16;

const ROI_COLOR: [u8; 3] = [255, 0, 0];
const GUIDE_COLOR: [u8; 3] = [0, 255, 0];

/// Placement of the two rectified images on a canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasLayout {
    /// Images are stacked vertically instead of side by side.
    pub vertical: bool,
    /// Scale from rectified image to canvas cell.
    pub scale: f64,
    /// Size of one cell.
    pub cell: ImageSize,
}

impl CanvasLayout {
    /// Fit two images of `image_size` in the display budget.
    pub fn new(image_size: ImageSize, vertical: bool) -> Self {
        let budget = if vertical {
            STACKED_BUDGET
        } else {
            SIDE_BY_SIDE_BUDGET
        };
        let scale = budget / image_size.width.max(image_size.height).max(1) as f64;
        let cell = ImageSize {
            width: ((image_size.width as f64 * scale).round() as usize).max(1),
            height: ((image_size.height as f64 * scale).round() as usize).max(1),
        };
        Self {
            vertical,
            scale,
            cell,
        }
    }

    /// Size of the whole canvas.
    pub fn canvas_size(&self) -> ImageSize {
        if self.vertical {
            ImageSize {
                width: self.cell.width,
                height: 2 * self.cell.height,
            }
        } else {
            ImageSize {
                width: 2 * self.cell.width,
                height: self.cell.height,
            }
        }
    }

    /// Top left corner of cell `k` on the canvas.
    pub fn origin(&self, k: usize) -> (usize, usize) {
        if self.vertical {
            (0, k * self.cell.height)
        } else {
            (k * self.cell.width, 0)
        }
    }
}

fn to_u8(image: &Image<f32, 1>) -> Result<Image<u8, 1>, StereoCalibError> {
    let data = image
        .as_slice()
        .iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    Ok(Image::new(image.size(), data)?)
}

/// Resample a raw grayscale image through a remap table.
pub fn rectify_image(
    image: &Image<u8, 1>,
    table: &RemapTable,
) -> Result<Image<u8, 1>, StereoCalibError> {
    let src = image.cast::<f32>()?;
    let mut dst = Image::<f32, 1>::from_size_val(table.size(), 0.0)?;
    table.apply(&src, &mut dst, InterpolationMode::Bilinear)?;
    to_u8(&dst)
}

/// Draw the detected corners of a board over a grayscale image.
pub fn draw_detected_corners(
    image: &Image<u8, 1>,
    pattern: PatternSize,
    corners: &[[f64; 2]],
    found: bool,
) -> Result<Image<u8, 3>, StereoCalibError> {
    let mut canvas = Image::<u8, 3>::from_size_val(image.size(), 0)?;
    rgb_from_gray(image, &mut canvas)?;
    draw_chessboard_corners(&mut canvas, pattern, corners, found);
    Ok(canvas)
}

/// Compose a rectified pair on one canvas with epipolar guide lines.
///
/// Images are placed side by side for horizontal rigs and stacked for vertical ones.
/// Valid pixel rectangles are outlined when the model has them.
///
/// # Arguments
///
/// * `images` - Raw grayscale images of the first and second camera.
/// * `tables` - Remap tables of the two cameras.
/// * `model` - The rectification the tables were built from.
pub fn compose_rectified_canvas(
    images: [&Image<u8, 1>; 2],
    tables: &[RemapTable; 2],
    model: &RectificationModel,
) -> Result<Image<u8, 3>, StereoCalibError> {
    let layout = CanvasLayout::new(model.image_size, model.is_vertical_stereo());
    let mut canvas = Image::<u8, 3>::from_size_val(layout.canvas_size(), 0)?;
    let canvas_width = canvas.width();

    for k in 0..2 {
        let rectified = rectify_image(images[k], &tables[k])?.cast::<f32>()?;
        let mut cell = Image::<f32, 1>::from_size_val(layout.cell, 0.0)?;
        resize_native(&rectified, &mut cell, InterpolationMode::Bilinear)?;
        let cell = to_u8(&cell)?;

        let (ox, oy) = layout.origin(k);
        let dst = canvas.as_slice_mut();
        for (y, row) in cell.as_slice().chunks_exact(layout.cell.width).enumerate() {
            for (x, &v) in row.iter().enumerate() {
                let idx = ((oy + y) * canvas_width + ox + x) * 3;
                dst[idx..idx + 3].copy_from_slice(&[v, v, v]);
            }
        }

        if let Some(roi) = model.valid_roi.as_ref().map(|r| r[k]) {
            let s = layout.scale;
            let x0 = ox as i64 + (roi.x as f64 * s).round() as i64;
            let y0 = oy as i64 + (roi.y as f64 * s).round() as i64;
            let w = (roi.width as f64 * s).round() as i64;
            let h = (roi.height as f64 * s).round() as i64;
            draw_rect(&mut canvas, (x0, y0), (x0 + w - 1, y0 + h - 1), ROI_COLOR, 3);
        }
    }

    let size = canvas.size();
    if layout.vertical {
        for x in (0..size.width).step_by(GUIDE_LINE_SPACING) {
            draw_line(
                &mut canvas,
                (x as i64, 0),
                (x as i64, size.height as i64 - 1),
                GUIDE_COLOR,
                1,
            );
        }
    } else {
        for y in (0..size.height).step_by(GUIDE_LINE_SPACING) {
            draw_line(
                &mut canvas,
                (0, y as i64),
                (size.width as i64 - 1, y as i64),
                GUIDE_COLOR,
                1,
            );
        }
    }

    Ok(canvas)
}
