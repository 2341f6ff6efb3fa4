//! The calibration pipeline as a sequence of stages.
//!
//! A [`CalibrationSession`] runs pair validation, the stereo solve, rectification
//! and remap table construction in that order and keeps the output of every stage.
//! Running a stage again drops everything computed after it.

use stereocal_3d::calib::{average_epipolar_error, stereo_calibrate, StereoCalibration};
use stereocal_3d::camera::CameraModel;
use stereocal_3d::rectify::{
    build_remap_tables, CalibratedRectifier, RectificationModel, RectificationStrategy,
    RemapTable, UncalibratedRectifier,
};
use stereocal_image::{Image, ImageSize};

use crate::artifacts::{CalibrationArtifacts, Diagnostics, ExtrinsicsArtifact, IntrinsicsArtifact};
use crate::config::{RectifyStrategyKind, StereoCalibConfig};
use crate::error::{DataError, StereoCalibError};
use crate::loader::ImageLoader;
use crate::validator::{validate_pairs, ValidatedPairs, ValidationReport};
use crate::visualize::{compose_rectified_canvas, draw_detected_corners};

/// Owns the configuration and the output of every pipeline stage.
pub struct CalibrationSession {
    config: StereoCalibConfig,
    validated: Option<ValidatedPairs>,
    calibration: Option<StereoCalibration>,
    epipolar_error: Option<f64>,
    rectification: Option<RectificationModel>,
    rectified_cameras: Option<[CameraModel; 2]>,
    remap_tables: Option<[RemapTable; 2]>,
}

impl CalibrationSession {
    /// Create a session after checking the configuration.
    pub fn new(config: StereoCalibConfig) -> Result<Self, StereoCalibError> {
        config.validate()?;
        Ok(Self {
            config,
            validated: None,
            calibration: None,
            epipolar_error: None,
            rectification: None,
            rectified_cameras: None,
            remap_tables: None,
        })
    }

    /// The configuration of the session.
    pub fn config(&self) -> &StereoCalibConfig {
        &self.config
    }

    /// Load the image pairs, detect the board and build the dataset.
    ///
    /// See [`validate_pairs`] for the acceptance rules.
    pub fn validate_pairs<L: ImageLoader + ?Sized>(
        &mut self,
        image_ids: &[String],
        loader: &L,
    ) -> Result<&ValidationReport, StereoCalibError> {
        self.validated = None;
        self.calibration = None;
        self.epipolar_error = None;
        self.clear_rectification();

        let validated = validate_pairs(image_ids, loader, &self.config)?;
        Ok(&self.validated.insert(validated).report)
    }

    /// Solve both cameras and their relative pose, then measure the epipolar error.
    pub fn calibrate(&mut self) -> Result<&StereoCalibration, StereoCalibError> {
        self.clear_rectification();
        let validated = self
            .validated
            .as_ref()
            .ok_or(StereoCalibError::MissingStage("validated image pairs"))?;

        let calibration = stereo_calibrate(
            &validated.dataset,
            validated.image_size,
            &self.config.calibration_params(),
        )?;
        log::info!(
            "done with RMS error={} after {} iterations ({:?})",
            calibration.rms_error,
            calibration.iterations,
            calibration.termination_reason
        );

        let epipolar_error = average_epipolar_error(
            &validated.dataset,
            &calibration.cameras,
            &calibration.fundamental,
        );
        log::info!("average epipolar err = {}", epipolar_error);

        self.epipolar_error = Some(epipolar_error);
        Ok(self.calibration.insert(calibration))
    }

    /// The solved rig if it can drive the calibrated rectification.
    fn trusted_calibration(&self) -> Option<&StereoCalibration> {
        self.calibration
            .as_ref()
            .filter(|c| c.rms_error.is_finite())
    }

    /// Compute the rectification with the configured strategy.
    ///
    /// The calibrated strategy needs a trusted solve; without one the session falls
    /// back to the uncalibrated strategy, using nominal cameras when nothing was
    /// solved.
    pub fn rectify(&mut self) -> Result<&RectificationModel, StereoCalibError> {
        let validated = self
            .validated
            .as_ref()
            .ok_or(StereoCalibError::MissingStage("validated image pairs"))?;
        let params = &self.config.rectify;

        let calibrated = match (params.strategy, self.trusted_calibration()) {
            (RectifyStrategyKind::Calibrated, Some(calibration)) => Some(calibration),
            (RectifyStrategyKind::Calibrated, None) => {
                log::warn!("no trusted calibration, falling back to uncalibrated rectification");
                None
            }
            (RectifyStrategyKind::Uncalibrated, _) => None,
        };

        let (strategy, cameras): (Box<dyn RectificationStrategy>, [CameraModel; 2]) =
            match calibrated {
                Some(calibration) => (
                    Box::new(
                        CalibratedRectifier::new(calibration.rotation, calibration.translation)
                            .with_alpha(params.alpha),
                    ),
                    calibration.cameras,
                ),
                None => {
                    let cameras = self
                        .calibration
                        .as_ref()
                        .map(|c| c.cameras)
                        .unwrap_or([CameraModel::nominal(validated.image_size); 2]);
                    (
                        Box::new(
                            UncalibratedRectifier::from_dataset(&validated.dataset)
                                .with_threshold(params.outlier_threshold),
                        ),
                        cameras,
                    )
                }
            };

        let model = strategy.rectify(&cameras, validated.image_size)?;
        log::info!(
            "rectified with the {} strategy{}",
            if strategy.is_calibrated() {
                "calibrated"
            } else {
                "uncalibrated"
            },
            if model.is_vertical_stereo() {
                ", vertical rig"
            } else {
                ""
            }
        );

        self.remap_tables = None;
        self.rectified_cameras = Some(cameras);
        Ok(self.rectification.insert(model))
    }

    /// Build the dense remap tables of both cameras.
    pub fn build_remap_tables(&mut self) -> Result<&[RemapTable; 2], StereoCalibError> {
        let (model, cameras) = self
            .rectification
            .as_ref()
            .zip(self.rectified_cameras.as_ref())
            .ok_or(StereoCalibError::MissingStage("rectification"))?;
        let tables = build_remap_tables(cameras, model)?;
        Ok(self.remap_tables.insert(tables))
    }

    /// Run every stage and collect the artifacts.
    pub fn run<L: ImageLoader + ?Sized>(
        &mut self,
        image_ids: &[String],
        loader: &L,
    ) -> Result<CalibrationArtifacts, StereoCalibError> {
        self.validate_pairs(image_ids, loader)?;
        self.calibrate()?;
        self.rectify()?;
        self.build_remap_tables()?;
        self.artifacts()
    }

    /// Collect intrinsics, extrinsics and diagnostics of a solved and rectified rig.
    pub fn artifacts(&self) -> Result<CalibrationArtifacts, StereoCalibError> {
        let validated = self
            .validated
            .as_ref()
            .ok_or(StereoCalibError::MissingStage("validated image pairs"))?;
        let calibration = self
            .calibration
            .as_ref()
            .ok_or(StereoCalibError::MissingStage("calibration"))?;
        let rectification = self
            .rectification
            .as_ref()
            .ok_or(StereoCalibError::MissingStage("rectification"))?;

        Ok(CalibrationArtifacts {
            intrinsics: IntrinsicsArtifact::from_cameras(&calibration.cameras),
            extrinsics: ExtrinsicsArtifact::new(calibration, rectification),
            diagnostics: Diagnostics::new(
                calibration,
                self.epipolar_error.unwrap_or(f64::NAN),
                &validated.report,
            ),
        })
    }

    /// Rectify the accepted pair at `index` onto an inspection canvas.
    pub fn render_accepted_pair<L: ImageLoader + ?Sized>(
        &self,
        index: usize,
        loader: &L,
    ) -> Result<Image<u8, 3>, StereoCalibError> {
        let report = self
            .validation_report()
            .ok_or(StereoCalibError::MissingStage("validated image pairs"))?;
        let ids = report
            .accepted_ids
            .get(index)
            .ok_or(StereoCalibError::PairIndexOutOfRange {
                index,
                accepted: report.num_accepted(),
            })?;
        let model = self
            .rectification
            .as_ref()
            .ok_or(StereoCalibError::MissingStage("rectification"))?;
        let tables = self
            .remap_tables
            .as_ref()
            .ok_or(StereoCalibError::MissingStage("remap tables"))?;

        let load = |id: &String| {
            loader.load(id).map_err(|source| DataError::ImageNotFound {
                id: id.clone(),
                source,
            })
        };
        let first = load(&ids[0])?;
        let second = load(&ids[1])?;
        compose_rectified_canvas([&first, &second], tables, model)
    }

    /// Draw the detected corners of the accepted pair at `index` over both images.
    pub fn render_accepted_corners<L: ImageLoader + ?Sized>(
        &self,
        index: usize,
        loader: &L,
    ) -> Result<[Image<u8, 3>; 2], StereoCalibError> {
        let validated = self
            .validated
            .as_ref()
            .ok_or(StereoCalibError::MissingStage("validated image pairs"))?;
        let ids = validated.report.accepted_ids.get(index).ok_or(
            StereoCalibError::PairIndexOutOfRange {
                index,
                accepted: validated.report.num_accepted(),
            },
        )?;

        let pattern = self.config.board.pattern_size();
        let overlay = |k: usize| -> Result<Image<u8, 3>, StereoCalibError> {
            let image = loader
                .load(&ids[k])
                .map_err(|source| DataError::ImageNotFound {
                    id: ids[k].clone(),
                    source,
                })?;
            let corners = &validated.dataset.image_points[k][index];
            draw_detected_corners(&image, pattern, corners, true)
        };
        Ok([overlay(0)?, overlay(1)?])
    }

    fn clear_rectification(&mut self) {
        self.rectification = None;
        self.rectified_cameras = None;
        self.remap_tables = None;
    }

    /// The validation report, once pairs have been validated.
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.validated.as_ref().map(|v| &v.report)
    }

    /// The accepted correspondences.
    pub fn validated_pairs(&self) -> Option<&ValidatedPairs> {
        self.validated.as_ref()
    }

    /// Size shared by the accepted images.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.validated.as_ref().map(|v| v.image_size)
    }

    /// The solved rig.
    pub fn calibration(&self) -> Option<&StereoCalibration> {
        self.calibration.as_ref()
    }

    /// Average epipolar error of the solved rig, in pixels.
    pub fn epipolar_error(&self) -> Option<f64> {
        self.epipolar_error
    }

    /// The rectification model.
    pub fn rectification(&self) -> Option<&RectificationModel> {
        self.rectification.as_ref()
    }

    /// Cameras the remap tables are built for.
    pub fn rectified_cameras(&self) -> Option<&[CameraModel; 2]> {
        self.rectified_cameras.as_ref()
    }

    /// The remap tables of both cameras.
    pub fn remap_tables(&self) -> Option<&[RemapTable; 2]> {
        self.remap_tables.as_ref()
    }
}
