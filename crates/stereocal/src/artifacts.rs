use stereocal_3d::calib::StereoCalibration;
use stereocal_3d::camera::CameraModel;
use stereocal_3d::optim::TerminationReason;
use stereocal_3d::rectify::{RectificationModel, RoiRect};
use stereocal_image::ImageSize;
use stereocal_imgproc::calibration::distortion::PolynomialDistortion;

use crate::validator::ValidationReport;

/// Camera matrices and distortion vectors of both cameras.
///
/// Distortion vectors hold `k1 k2 p1 p2 k3`, followed by `k4 k5 k6` when the
/// rational model is in use.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IntrinsicsArtifact {
    /// Camera matrix of the first camera.
    #[serde(rename = "M1")]
    pub m1: [[f64; 3]; 3],
    /// Distortion coefficients of the first camera.
    #[serde(rename = "D1")]
    pub d1: Vec<f64>,
    /// Camera matrix of the second camera.
    #[serde(rename = "M2")]
    pub m2: [[f64; 3]; 3],
    /// Distortion coefficients of the second camera.
    #[serde(rename = "D2")]
    pub d2: Vec<f64>,
}

fn distortion_vector(distortion: &PolynomialDistortion) -> Vec<f64> {
    let coeffs = distortion.coefficients();
    if distortion.is_rational() {
        coeffs.to_vec()
    } else {
        coeffs[..5].to_vec()
    }
}

impl IntrinsicsArtifact {
    /// Collect the intrinsics of a camera pair.
    pub fn from_cameras(cameras: &[CameraModel; 2]) -> Self {
        Self {
            m1: cameras[0].camera_matrix,
            d1: distortion_vector(&cameras[0].distortion),
            m2: cameras[1].camera_matrix,
            d2: distortion_vector(&cameras[1].distortion),
        }
    }

    /// Rebuild the camera models.
    pub fn to_cameras(&self) -> [CameraModel; 2] {
        [
            CameraModel::new(self.m1, PolynomialDistortion::from_coefficients(&self.d1)),
            CameraModel::new(self.m2, PolynomialDistortion::from_coefficients(&self.d2)),
        ]
    }
}

/// Relative pose and rectification of the rig.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExtrinsicsArtifact {
    /// Rotation from the first to the second camera.
    #[serde(rename = "R")]
    pub r: [[f64; 3]; 3],
    /// Translation from the first to the second camera.
    #[serde(rename = "T")]
    pub t: [f64; 3],
    /// Rectification rotation of the first camera.
    #[serde(rename = "R1")]
    pub r1: [[f64; 3]; 3],
    /// Rectification rotation of the second camera.
    #[serde(rename = "R2")]
    pub r2: [[f64; 3]; 3],
    /// Rectified projection of the first camera.
    #[serde(rename = "P1")]
    pub p1: [[f64; 4]; 3],
    /// Rectified projection of the second camera.
    #[serde(rename = "P2")]
    pub p2: [[f64; 4]; 3],
    /// Disparity-to-depth matrix, only on the calibrated path.
    #[serde(rename = "Q")]
    pub q: Option<[[f64; 4]; 4]>,
    /// Valid pixel rectangles of the rectified images, only on the calibrated path.
    pub valid_roi: Option<[RoiRect; 2]>,
    /// Size of the rectified images.
    pub image_size: ImageSize,
}

impl ExtrinsicsArtifact {
    /// Combine a solved rig and its rectification.
    pub fn new(calibration: &StereoCalibration, rectification: &RectificationModel) -> Self {
        Self {
            r: calibration.rotation,
            t: calibration.translation,
            r1: rectification.rectification[0],
            r2: rectification.rectification[1],
            p1: rectification.projection[0],
            p2: rectification.projection[1],
            q: rectification.disparity_to_depth,
            valid_roi: rectification.valid_roi,
            image_size: rectification.image_size,
        }
    }
}

/// Quality signals of a run. None of them gates the pipeline.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostics {
    /// RMS reprojection error over both cameras, in pixels.
    pub rms_error: f64,
    /// Average point to epipolar line distance, in pixels.
    pub epipolar_error: f64,
    /// RMS reprojection error of each view for the two cameras.
    pub per_view_errors: Vec<[f64; 2]>,
    /// Identifiers of the pairs used by the solver.
    pub accepted_pairs: Vec<[String; 2]>,
    /// Indices of the pairs left out.
    pub rejected_pairs: Vec<usize>,
    /// Iterations of the joint refinement.
    pub iterations: usize,
    /// Why the joint refinement stopped.
    pub termination_reason: TerminationReason,
}

impl Diagnostics {
    /// Summarize a solve and its validation.
    pub fn new(
        calibration: &StereoCalibration,
        epipolar_error: f64,
        report: &ValidationReport,
    ) -> Self {
        Self {
            rms_error: calibration.rms_error,
            epipolar_error,
            per_view_errors: calibration.per_view_errors.clone(),
            accepted_pairs: report.accepted_ids.clone(),
            rejected_pairs: report.rejections.iter().map(|r| r.index).collect(),
            iterations: calibration.iterations,
            termination_reason: calibration.termination_reason,
        }
    }
}

/// Everything a full run produces.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationArtifacts {
    /// Camera intrinsics.
    pub intrinsics: IntrinsicsArtifact,
    /// Relative pose and rectification.
    pub extrinsics: ExtrinsicsArtifact,
    /// Quality signals.
    pub diagnostics: Diagnostics,
}
