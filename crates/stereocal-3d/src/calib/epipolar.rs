use super::dataset::StereoDataset;
use crate::camera::CameraModel;
use crate::linalg::mat33_transpose;
use crate::pose::compute_epilines;

fn line_distance(l: &[f64; 3], p: &[f64; 2]) -> f64 {
    (l[0] * p[0] + l[1] * p[1] + l[2]).abs()
}

/// Average epipolar error of a calibrated stereo pair, in pixels.
///
/// The points of each camera are undistorted and re-projected through that camera's
/// own matrix, which is the pixel space the fundamental matrix lives in. For every
/// correspondence the distance of each point to the epipolar line of its partner
/// is added, and the total is divided by the number of correspondences.
///
/// # Arguments
///
/// * `dataset` - Board observations of both cameras.
/// * `cameras` - Calibrated first and second camera.
/// * `fundamental` - Fundamental matrix with `x1^T * F * x0 = 0`.
///
/// # Returns
///
/// The average error, or `0.0` for an empty dataset.
pub fn average_epipolar_error(
    dataset: &StereoDataset,
    cameras: &[CameraModel; 2],
    fundamental: &[[f64; 3]; 3],
) -> f64 {
    let ft = mat33_transpose(fundamental);
    let mut total = 0.0;
    let mut count = 0usize;

    for (img0, img1) in dataset.image_points[0].iter().zip(dataset.image_points[1].iter()) {
        let pts0 = cameras[0].undistort_pixels(img0);
        let pts1 = cameras[1].undistort_pixels(img1);
        let lines1 = compute_epilines(&pts0, fundamental);
        let lines0 = compute_epilines(&pts1, &ft);

        for k in 0..pts0.len().min(pts1.len()) {
            total += line_distance(&lines1[k], &pts1[k]) + line_distance(&lines0[k], &pts0[k]);
            count += 1;
        }
    }

    if count == 0 {
        return 0.0;
    }
    let avg = total / count as f64;
    log::debug!("average epipolar error: {:.4} px over {} points", avg, count);
    avg
}
