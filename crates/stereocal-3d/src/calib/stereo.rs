use stereocal_image::ImageSize;
use stereocal_imgproc::calibration::TermCriteria;

use super::dataset::StereoDataset;
use super::extrinsics::{init_board_pose, median_pose, BoardPose};
use super::intrinsics::init_camera_matrix;
use super::problem::{ParamLayout, ReprojectionProblem};
use super::projection::rms_error;
use crate::camera::CameraModel;
use crate::linalg::{mat33_mul, mat33_mul_vec3, mat33_transpose};
use crate::optim::{LevenbergMarquardt, TerminationReason};
use crate::pose::{essential_from_pose, fundamental_from_essential};
use crate::CalibError;

/// Constraints applied to the camera parameters during calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CalibrationFlags {
    /// Both cameras share `fx` and `fy`.
    pub same_focal_length: bool,
    /// Keep `fy / fx` at its initial value.
    pub fix_aspect_ratio: bool,
    /// Tangential coefficients `p1`, `p2` are zero and not optimized.
    pub zero_tangent_dist: bool,
    /// Number of optimized radial coefficients `k1..k6`, from 0 to 6.
    ///
    /// Values above 3 enable the rational model.
    pub radial_terms: usize,
    /// Keep the principal point at its initial value.
    pub fix_principal_point: bool,
    /// Refine each camera on its own before the joint stereo refinement.
    pub refine_individually: bool,
}

impl Default for CalibrationFlags {
    fn default() -> Self {
        Self {
            same_focal_length: true,
            fix_aspect_ratio: true,
            zero_tangent_dist: true,
            radial_terms: 2,
            fix_principal_point: false,
            refine_individually: true,
        }
    }
}

impl CalibrationFlags {
    /// Check the flag values.
    pub fn validate(&self) -> Result<(), CalibError> {
        if self.radial_terms > 6 {
            return Err(CalibError::InvalidParameter(
                "radial_terms",
                format!("at most 6 radial coefficients, got {}", self.radial_terms),
            ));
        }
        Ok(())
    }
}

/// Parameters of the stereo calibration.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StereoCalibrationParams {
    /// Parameter constraints.
    pub flags: CalibrationFlags,
    /// Stopping rule of the non-linear refinement.
    pub criteria: TermCriteria,
    /// Initial camera models; when absent they are seeded from the board views.
    pub intrinsic_guess: Option<[CameraModel; 2]>,
}

impl Default for StereoCalibrationParams {
    fn default() -> Self {
        Self {
            flags: CalibrationFlags::default(),
            criteria: TermCriteria::new(100, 1e-5),
            intrinsic_guess: None,
        }
    }
}

impl StereoCalibrationParams {
    /// Set the parameter constraints.
    pub fn with_flags(mut self, flags: CalibrationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the stopping rule.
    pub fn with_criteria(mut self, criteria: TermCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Start from known camera models instead of seeding them.
    pub fn with_intrinsic_guess(mut self, cameras: [CameraModel; 2]) -> Self {
        self.intrinsic_guess = Some(cameras);
        self
    }
}

/// Result of a single camera calibration.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MonoCalibration {
    /// The calibrated camera.
    pub camera: CameraModel,
    /// Board pose of every view.
    pub poses: Vec<BoardPose>,
    /// RMS reprojection error in pixels.
    pub rms_error: f64,
    /// RMS reprojection error of every view.
    pub per_view_errors: Vec<f64>,
}

/// Result of a stereo calibration.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StereoCalibration {
    /// First and second camera.
    pub cameras: [CameraModel; 2],
    /// Rotation from the first to the second camera frame.
    pub rotation: [[f64; 3]; 3],
    /// Translation from the first to the second camera frame.
    pub translation: [f64; 3],
    /// Essential matrix `[T]x R`.
    pub essential: [[f64; 3]; 3],
    /// Fundamental matrix, `F[2][2] = 1` when not zero.
    pub fundamental: [[f64; 3]; 3],
    /// RMS reprojection error in pixels over both cameras.
    pub rms_error: f64,
    /// RMS reprojection error of every view, per camera.
    pub per_view_errors: Vec<[f64; 2]>,
    /// Board pose of every view in the first camera.
    pub poses: Vec<BoardPose>,
    /// Iterations of the joint refinement.
    pub iterations: usize,
    /// Why the joint refinement stopped.
    pub termination_reason: TerminationReason,
}

fn optimizer(criteria: &TermCriteria) -> LevenbergMarquardt {
    LevenbergMarquardt::new()
        .with_max_iterations(criteria.max_iterations)
        .with_step_tolerance(criteria.epsilon)
}

fn check_views(object_points: &[Vec<[f64; 3]>]) -> Result<(), CalibError> {
    if object_points.len() < 2 {
        return Err(CalibError::NotEnoughPoints {
            what: "views",
            required: 2,
            got: object_points.len(),
        });
    }
    if let Some(view) = object_points.iter().find(|v| v.len() < 4) {
        return Err(CalibError::NotEnoughPoints {
            what: "points per view",
            required: 4,
            got: view.len(),
        });
    }
    Ok(())
}

/// Calibrate a single camera from several views of a planar board.
///
/// The camera is seeded with [`init_camera_matrix`] unless `guess` is given, the
/// board poses are initialized from their homographies and everything is refined
/// with Levenberg-Marquardt under the constraints of `flags`.
///
/// # Errors
///
/// Fails with fewer than 2 views or when the views are degenerate.
pub fn calibrate_camera(
    object_points: &[Vec<[f64; 3]>],
    image_points: &[Vec<[f64; 2]>],
    image_size: ImageSize,
    flags: &CalibrationFlags,
    criteria: &TermCriteria,
    guess: Option<&CameraModel>,
) -> Result<MonoCalibration, CalibError> {
    flags.validate()?;
    check_views(object_points)?;
    if object_points.len() != image_points.len() {
        return Err(CalibError::LengthMismatch(
            object_points.len(),
            image_points.len(),
        ));
    }

    let camera = match guess {
        Some(camera) => *camera,
        None => {
            let aspect = flags.fix_aspect_ratio.then_some(1.0);
            let k = init_camera_matrix(object_points, image_points, image_size, aspect)?;
            CameraModel::new(k, Default::default())
        }
    };

    let poses = object_points
        .iter()
        .zip(image_points.iter())
        .map(|(obj, img)| init_board_pose(obj, img, &camera))
        .collect::<Result<Vec<_>, _>>()?;

    let layout = ParamLayout::new(&[camera], None, &poses, flags);
    let problem = ReprojectionProblem::new(layout, object_points, vec![image_points]);
    let mut params = problem.layout.initial_free();
    let result = optimizer(criteria).optimize(&problem, &mut params)?;

    let full = problem.layout.unpack(&params);
    let per_view_sq = problem.squared_errors(&params);
    let per_view_errors = per_view_sq
        .iter()
        .zip(object_points.iter())
        .map(|(sq, obj)| rms_error(sq[0], obj.len()))
        .collect();
    let num_points = object_points.iter().map(Vec::len).sum();

    log::debug!(
        "mono calibration: {} iterations, {:?}",
        result.iterations,
        result.termination_reason
    );

    Ok(MonoCalibration {
        camera: problem.layout.camera(&full, 0),
        poses: (0..object_points.len())
            .map(|v| problem.layout.view(&full, v))
            .collect(),
        rms_error: rms_error(result.final_cost, num_points),
        per_view_errors,
    })
}

/// Jointly calibrate a stereo pair from synchronized board views.
///
/// Each camera is seeded on its own (optionally refined individually), the
/// relative pose is initialized from the median of the per-view relative poses and
/// all parameters are refined together to minimize the reprojection error in both
/// images. The essential and fundamental matrices follow from the refined pose.
///
/// # Arguments
///
/// * `dataset` - Board observations, at least 2 views.
/// * `image_size` - Size of the calibration images.
/// * `params` - Constraints, stopping rule and optional initial cameras.
///
/// # Errors
///
/// Fails on invalid flags, too few views or degenerate geometry.
pub fn stereo_calibrate(
    dataset: &StereoDataset,
    image_size: ImageSize,
    params: &StereoCalibrationParams,
) -> Result<StereoCalibration, CalibError> {
    let flags = &params.flags;
    flags.validate()?;
    dataset.validate()?;
    check_views(&dataset.object_points)?;

    let mut cameras = [CameraModel::nominal(image_size); 2];
    let mut poses: [Vec<BoardPose>; 2] = [Vec::new(), Vec::new()];

    for c in 0..2 {
        let guess = params.intrinsic_guess.as_ref().map(|g| &g[c]);
        let mono = if flags.refine_individually {
            calibrate_camera(
                &dataset.object_points,
                &dataset.image_points[c],
                image_size,
                flags,
                &params.criteria,
                guess,
            )?
        } else {
            let camera = match guess {
                Some(camera) => *camera,
                None => {
                    let aspect = flags.fix_aspect_ratio.then_some(1.0);
                    let k = init_camera_matrix(
                        &dataset.object_points,
                        &dataset.image_points[c],
                        image_size,
                        aspect,
                    )?;
                    CameraModel::new(k, Default::default())
                }
            };
            let poses = dataset
                .object_points
                .iter()
                .zip(dataset.image_points[c].iter())
                .map(|(obj, img)| init_board_pose(obj, img, &camera))
                .collect::<Result<Vec<_>, _>>()?;
            MonoCalibration {
                camera,
                poses,
                rms_error: f64::NAN,
                per_view_errors: Vec::new(),
            }
        };

        if flags.refine_individually {
            log::info!("camera {} individual rms error: {:.4}", c, mono.rms_error);
        }
        cameras[c] = mono.camera;
        poses[c] = mono.poses;
    }

    // relative pose of every view, R = R1 * R0^T, t = t1 - R * t0
    let relatives = poses[0]
        .iter()
        .zip(poses[1].iter())
        .map(|(p0, p1)| {
            let r = mat33_mul(&p1.rotation_matrix(), &mat33_transpose(&p0.rotation_matrix()));
            let rt0 = mat33_mul_vec3(&r, &p0.tvec);
            BoardPose::from_rotation(
                &r,
                [p1.tvec[0] - rt0[0], p1.tvec[1] - rt0[1], p1.tvec[2] - rt0[2]],
            )
        })
        .collect::<Vec<_>>();
    let relative = median_pose(&relatives);

    let layout = ParamLayout::new(&cameras, Some(&relative), &poses[0], flags);
    let image_points = vec![
        dataset.image_points[0].as_slice(),
        dataset.image_points[1].as_slice(),
    ];
    let problem = ReprojectionProblem::new(layout, &dataset.object_points, image_points);
    let mut free = problem.layout.initial_free();
    let result = optimizer(&params.criteria).optimize(&problem, &mut free)?;

    let full = problem.layout.unpack(&free);
    let cameras = [problem.layout.camera(&full, 0), problem.layout.camera(&full, 1)];
    let relative = problem.layout.relative(&full);
    let rotation = relative.rotation_matrix();
    let translation = relative.tvec;

    let essential = essential_from_pose(&rotation, &translation);
    let fundamental = fundamental_from_essential(
        &essential,
        &cameras[0].camera_matrix,
        &cameras[1].camera_matrix,
    )?;

    let per_view_errors = problem
        .squared_errors(&free)
        .iter()
        .zip(dataset.object_points.iter())
        .map(|(sq, obj)| [rms_error(sq[0], obj.len()), rms_error(sq[1], obj.len())])
        .collect();
    let rms = rms_error(result.final_cost, 2 * dataset.num_points());

    log::info!(
        "stereo calibration: rms {:.4} px after {} iterations ({:?})",
        rms,
        result.iterations,
        result.termination_reason
    );

    Ok(StereoCalibration {
        cameras,
        rotation,
        translation,
        essential,
        fundamental,
        rms_error: rms,
        per_view_errors,
        poses: (0..dataset.num_views())
            .map(|v| problem.layout.view(&full, v))
            .collect(),
        iterations: result.iterations,
        termination_reason: result.termination_reason,
    })
}
